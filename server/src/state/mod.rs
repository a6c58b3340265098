pub mod assembler;
pub mod notifier;
pub mod orchestrator;
pub mod repository;
pub mod stream;

pub use notifier::Notifier;
pub use orchestrator::StateOrchestrator;
pub use repository::StateRepository;
pub use stream::StreamService;
