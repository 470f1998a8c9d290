pub mod error;
pub mod trigger;
pub mod locomotion;
pub mod renderer;
pub mod args;
pub mod command;

pub use error::{DeviceError, RendererError, RigError};
pub use locomotion::{LocoDescriptor, Locomotion};
pub use renderer::{RecordingTransport, RenderCommand, RenderTransport, StimClient};
pub use trigger::{Trigger, TriggerDescriptor};
