pub mod mutation_listener;

pub use mutation_listener::MutationListener;
