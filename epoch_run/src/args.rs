use clap;
use std::path::PathBuf;

#[derive(clap::Parser,Debug)]
pub struct EpochRunArgs {
    /// configuration file. Defaults to $EPOCH_RUN_CONFIG or epoch_run.toml in this or a parent directory
    #[clap(short, long, global = true)]
    pub config:Option<PathBuf>,
    #[command(subcommand)]
    pub action: Action,
}

#[derive(clap::Subcommand,Debug)]
pub enum Action {
    /// create a new experiment record
    Init(InitArgs),
    /// add an animal to an experiment record
    CreateAnimal(CreateAnimalArgs),
    /// run a protocol without saving
    View(ViewArgs),
    /// run a protocol and save it as a new series
    Record(RecordArgs),
    /// save the current parameters of a protocol under a name
    SavePreset(SavePresetArgs),
    ListProtocols,
    ListPresets(ListPresetsArgs),
    /// attach a note to an experiment record
    Note(NoteArgs),
}

#[derive(clap::Args,Debug)]
pub struct InitArgs {
    /// relative paths are taken from the data directory
    pub experiment:PathBuf,
}

#[derive(clap::Args,Debug)]
pub struct CreateAnimalArgs {
    pub experiment:PathBuf,
    /// key=value pairs, at least animal_id
    pub metadata:Vec<String>,
}

#[derive(clap::Args,Debug)]
pub struct ProtocolArgs {
    pub protocol:String,
    #[clap(short, long)]
    pub preset:Option<String>,
    /// key=value parameter settings applied after the preset
    #[clap(short = 's', long = "set")]
    pub parameters:Vec<String>,
}

#[derive(clap::Args,Debug)]
pub struct ViewArgs {
    #[command(flatten)]
    pub protocol:ProtocolArgs,
    /// log renderer commands instead of sending them
    #[clap(long)]
    pub dry_run:bool,
}

#[derive(clap::Args,Debug)]
pub struct RecordArgs {
    pub experiment:PathBuf,
    #[clap(short, long)]
    pub animal:String,
    #[command(flatten)]
    pub protocol:ProtocolArgs,
    /// record as this series number instead of the next free one
    #[clap(long)]
    pub series:Option<u32>,
    #[clap(long)]
    pub dry_run:bool,
}

#[derive(clap::Args,Debug)]
pub struct SavePresetArgs {
    #[command(flatten)]
    pub protocol:ProtocolArgs,
    pub name:String,
}

#[derive(clap::Args,Debug)]
pub struct ListPresetsArgs {
    /// without a protocol, list the protocols that have saved presets
    pub protocol:Option<String>,
}

#[derive(clap::Args,Debug)]
pub struct NoteArgs {
    pub experiment:PathBuf,
    pub text:String,
}
