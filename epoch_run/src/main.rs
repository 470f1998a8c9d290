use clap::Parser;
use tracing_subscriber::EnvFilter;
use epoch_run::args::*;
use epoch_run::command::*;

fn main(){
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = EpochRunArgs::parse();
    let config = args.config.as_deref();
    use Action::*;
    let result = match &args.action {
        Init(args) => init(config,args),
        CreateAnimal(args) => create_animal(config,args),
        View(args) => view(config,args),
        Record(args) => record(config,args),
        SavePreset(args) => save_preset(config,args),
        ListProtocols => list_protocols(config),
        ListPresets(args) => list_presets(config,args),
        Note(args) => note(config,args),
    };
    if let Err(e) = result {
        tracing::error!(kind = %e.kind(),"{}",e);
        std::process::exit(1);
    }
}
