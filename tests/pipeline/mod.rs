mod support;

mod failover;
mod happy_path;
mod queue_gating;
mod recovery;
mod retry;
mod streaming;
