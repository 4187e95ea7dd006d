pub mod db;
pub mod orchestrator;
pub mod progress;
pub mod rewrite;
pub mod scanner;
pub mod serialized;
pub mod store;
pub mod strategies;

pub mod util {
    pub mod env;
}
