mod escalation;
mod half_open;
mod thresholds;
