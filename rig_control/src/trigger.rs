use std::process::Command;
use std::{thread, time::Duration};
use serde::{Serialize,Deserialize};
use tracing::{debug, info};
use crate::error::DeviceError;

pub trait Trigger: Send {
    /// emit a short pulse on channel
    fn send_trigger(&mut self,channel:u32) -> Result<(),DeviceError>;
    /// emit one step waveform. Returns after the step has completed.
    fn output_step(&mut self,channel:u32,low_time:f64,high_time:f64,initial_delay:f64) -> Result<(),DeviceError>;
}

/// How to reach the trigger hardware. Read from the rig's devices table.
#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TriggerDescriptor {
    /// log only
    None,
    /// run an external program for every pulse, with the channel as its final argument
    Command {
        program:String,
        #[serde(default)]
        args:Vec<String>,
        #[serde(default)]
        channel:u32,
    },
}

impl Default for TriggerDescriptor {
    fn default() -> Self {
        TriggerDescriptor::None
    }
}

impl TriggerDescriptor {
    pub fn channel(&self) -> u32 {
        match self {
            TriggerDescriptor::None => 0,
            TriggerDescriptor::Command { channel, .. } => *channel,
        }
    }

    pub fn build(&self) -> Box<dyn Trigger> {
        match self {
            TriggerDescriptor::None => Box::new(NoTrigger),
            TriggerDescriptor::Command { program, args, .. } => Box::new(CommandTrigger::new(program,args)),
        }
    }
}

#[derive(Clone,Debug,Default)]
pub struct NoTrigger;

impl Trigger for NoTrigger {
    fn send_trigger(&mut self,channel:u32) -> Result<(),DeviceError> {
        debug!(channel,"trigger (no device)");
        Ok(())
    }
    fn output_step(&mut self,channel:u32,low_time:f64,high_time:f64,initial_delay:f64) -> Result<(),DeviceError> {
        debug!(channel,low_time,high_time,initial_delay,"output step (no device)");
        let total = initial_delay + low_time + high_time;
        let length = Duration::try_from_secs_f64(total)
            .map_err(|_| DeviceError::DeviceUnavailable(format!("cannot output a step lasting {} seconds",total)))?;
        thread::sleep(length);
        Ok(())
    }
}

#[derive(Clone,Debug)]
pub struct CommandTrigger {
    program:String,
    args:Vec<String>,
}

impl CommandTrigger {

    pub fn new(program:&str,args:&[String]) -> Self {
        Self {
            program:program.to_string(),
            args:args.to_vec(),
        }
    }

    fn run(&self,extra:&[String]) -> Result<(),DeviceError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).args(extra);
        debug!("{:?}",cmd);
        let status = cmd.status()
            .map_err(|e| DeviceError::DeviceUnavailable(format!("cannot launch {}: {}",self.program,e)))?;
        match status.success() {
            true => Ok(()),
            false => Err(DeviceError::DeviceUnavailable(format!("{} exited with {}",self.program,status)))
        }
    }
}

impl Trigger for CommandTrigger {
    fn send_trigger(&mut self,channel:u32) -> Result<(),DeviceError> {
        self.run(&[channel.to_string()])
    }

    fn output_step(&mut self,channel:u32,low_time:f64,high_time:f64,initial_delay:f64) -> Result<(),DeviceError> {
        info!(channel,low_time,high_time,initial_delay,"output step");
        self.run(&[
            String::from("--step"),
            low_time.to_string(),
            high_time.to_string(),
            initial_delay.to_string(),
            channel.to_string(),
        ])
    }
}
