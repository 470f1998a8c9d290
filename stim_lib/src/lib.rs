pub mod params;
pub mod selector;
pub mod trajectory;
pub mod protocol;
pub mod presets;
pub mod library;
pub mod drifting_grating;
pub mod moving_patch;
pub mod looming_spot;
pub mod expanding_spot;
pub mod flickering_patch;
pub mod uniform_flash;
pub mod checkerboard_noise;
pub mod composite_suite;

pub use params::{ParamValue, Params, ParamsExt};
pub use protocol::{EpochContext, EpochSpec, Protocol, ProtocolError, RunTiming, StimulusProtocol};
pub use selector::{ParamSpec, SelectorState};
pub use presets::{Preset, PresetStore};
pub use library::{ProtocolLibrary, ProtocolName};
