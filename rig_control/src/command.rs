use std::fs;
use tracing::info;
use crate::args::*;
use crate::error::RigError;
use crate::renderer::StimClient;
use crate::trigger::TriggerDescriptor;

fn trigger_descriptor(args:&TriggerArgs) -> Result<TriggerDescriptor,RigError> {
    match &args.device {
        Some(path) => Ok(toml::from_str(&fs::read_to_string(path)?)?),
        None => Ok(TriggerDescriptor::default()),
    }
}

fn client(args:&RendererArgs) -> Result<StimClient,RigError> {
    let client = match &args.local {
        Some(program) => StimClient::launch(program)?,
        None => StimClient::connect(&args.host,args.port)?,
    };
    Ok(client)
}

pub fn send_trigger(args:&TriggerArgs) -> Result<(),RigError> {
    let descriptor = trigger_descriptor(args)?;
    let channel = args.channel.unwrap_or(descriptor.channel());
    descriptor.build().send_trigger(channel)?;
    info!(channel,"trigger sent");
    Ok(())
}

pub fn output_step(args:&OutputStepArgs) -> Result<(),RigError> {
    let descriptor = trigger_descriptor(&args.trigger)?;
    let channel = args.trigger.channel.unwrap_or(descriptor.channel());
    descriptor.build().output_step(channel,args.low_time,args.high_time,args.initial_delay)?;
    Ok(())
}

pub fn set_idle_background(args:&IdleBackgroundArgs) -> Result<(),RigError> {
    client(&args.renderer)?.set_idle_background(args.color)?;
    Ok(())
}

pub fn print_on_server(args:&PrintArgs) -> Result<(),RigError> {
    client(&args.renderer)?.print_on_server(&args.text)?;
    Ok(())
}
