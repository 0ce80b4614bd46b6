pub mod models;
pub mod queue;

pub use models::{BrokerMessage, BroccoliError, MqConfig, MqQueue, init_mq};
pub use queue::BroccoliJobQueue;

pub type Mq = MqQueue;
