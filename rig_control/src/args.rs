use std::path::PathBuf;
use crate::renderer::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(clap::Parser,Debug)]
pub struct RigControlArgs {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(clap::Subcommand,Debug)]
pub enum Action {
    /// emit a single trigger pulse
    SendTrigger(TriggerArgs),
    /// emit one step waveform on the trigger output
    OutputStep(OutputStepArgs),
    /// set the renderer's idle fill color
    SetIdleBackground(IdleBackgroundArgs),
    /// write a marker into the renderer's log
    PrintOnServer(PrintArgs),
}

#[derive(clap::Args,Debug)]
pub struct TriggerArgs {
    /// toml file holding a trigger descriptor. Without one the trigger only logs.
    #[clap(short, long)]
    pub device:Option<PathBuf>,
    /// overrides the descriptor's channel
    #[clap(short, long)]
    pub channel:Option<u32>,
}

#[derive(clap::Args,Debug)]
pub struct OutputStepArgs {
    #[command(flatten)]
    pub trigger:TriggerArgs,
    pub low_time:f64,
    pub high_time:f64,
    #[clap(short, long, default_value_t = 0.0)]
    pub initial_delay:f64,
}

#[derive(clap::Args,Debug)]
pub struct RendererArgs {
    #[clap(long, default_value = DEFAULT_HOST)]
    pub host:String,
    #[clap(long, default_value_t = DEFAULT_PORT)]
    pub port:u16,
    /// launch this renderer program instead of connecting to a server
    #[clap(long)]
    pub local:Option<String>,
}

#[derive(clap::Args,Debug)]
pub struct IdleBackgroundArgs {
    pub color:f64,
    #[command(flatten)]
    pub renderer:RendererArgs,
}

#[derive(clap::Args,Debug)]
pub struct PrintArgs {
    pub text:String,
    #[command(flatten)]
    pub renderer:RendererArgs,
}
