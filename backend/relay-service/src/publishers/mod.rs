pub mod activity_publisher;
pub mod dlq_publisher;

pub use activity_publisher::{ActivityPublisher, ActivityPublisherConfig};
pub use dlq_publisher::{DlqConfig, DlqPublisher};
