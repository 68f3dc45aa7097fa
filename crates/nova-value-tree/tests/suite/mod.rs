mod children;
mod lifecycle;
mod scheduling;
