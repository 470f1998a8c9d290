use clap::Parser;
use tracing_subscriber::EnvFilter;
use rig_control::args::*;
use rig_control::command::*;

fn main(){
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = RigControlArgs::parse();
    use Action::*;
    let result = match &args.action {
        SendTrigger(args) => send_trigger(args),
        OutputStep(args) => output_step(args),
        SetIdleBackground(args) => set_idle_background(args),
        PrintOnServer(args) => print_on_server(args),
    };
    if let Err(e) = result {
        tracing::error!("{}",e);
        std::process::exit(1);
    }
}
