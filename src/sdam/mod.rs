/*!
 * Server Discovery and Monitoring (distilled spec §4.5/§4.6).
 */

pub mod event;
pub mod monitor;
pub mod server_description;

pub use event::MonitorEvent;
pub use monitor::{MonitorHandle, DEFAULT_HEARTBEAT_FREQUENCY_MS, MIN_HEARTBEAT_FREQUENCY_MS};
pub use server_description::{ServerDescription, ServerType, TagSet};
