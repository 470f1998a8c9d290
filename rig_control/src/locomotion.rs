/*
    Locomotion (ball tracking) runs in its own process. It is started with the save directory of the
    run and driven with one json command per line on its stdin.
 */
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use serde::{Serialize,Deserialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use crate::error::DeviceError;

/// how long close waits for the tracker to exit before killing it
pub const CLOSE_GRACE:Duration = Duration::from_secs(2);
const EXIT_POLL:Duration = Duration::from_millis(10);

pub trait Locomotion: Send {
    fn start(&mut self,save_directory:Option<&Path>) -> Result<(),DeviceError>;
    fn close(&mut self) -> Result<(),DeviceError>;
    fn set_pos_0(&mut self,theta_0:f64,x_0:f64,y_0:f64) -> Result<(),DeviceError>;
    fn loop_start(&mut self) -> Result<(),DeviceError>;
    fn loop_stop(&mut self) -> Result<(),DeviceError>;
    fn loop_start_closed_loop(&mut self) -> Result<(),DeviceError>;
    fn loop_stop_closed_loop(&mut self) -> Result<(),DeviceError>;
    fn loop_update_closed_loop_vars(&mut self,vars:&Map<String,Value>) -> Result<(),DeviceError>;
}

#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
pub struct LocoDescriptor {
    pub program:String,
    #[serde(default)]
    pub args:Vec<String>,
}

impl LocoDescriptor {
    pub fn build(&self) -> Box<dyn Locomotion> {
        Box::new(ProcessLoco::new(&self.program,&self.args))
    }
}

pub struct ProcessLoco {
    program:String,
    args:Vec<String>,
    child:Option<Child>,
    stdin:Option<ChildStdin>,
    close_grace:Duration,
}

impl ProcessLoco {

    pub fn new(program:&str,args:&[String]) -> Self {
        Self {
            program:program.to_string(),
            args:args.to_vec(),
            child:None,
            stdin:None,
            close_grace:CLOSE_GRACE,
        }
    }

    pub fn with_close_grace(mut self,grace:Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// wait for the child to exit on its own, kill it once the grace period is over
    fn reap(&self,mut child:Child) -> Result<(),DeviceError> {
        let deadline = Instant::now() + self.close_grace;
        loop {
            match child.try_wait().map_err(|e| self.unavailable(e))? {
                Some(status) => {
                    debug!(%status,"locomotion exited");
                    return Ok(())
                }
                None if Instant::now() >= deadline => break,
                None => sleep(EXIT_POLL),
            }
        }
        warn!(program = %self.program,"locomotion did not exit after close, killing it");
        let _ = child.kill();
        let _ = child.wait();
        Err(self.unavailable(format!("did not exit within {:?} of close",self.close_grace)))
    }

    fn unavailable(&self,what:impl std::fmt::Display) -> DeviceError {
        DeviceError::DeviceUnavailable(format!("locomotion {}: {}",self.program,what))
    }

    fn send(&mut self,message:Value) -> Result<(),DeviceError> {
        let line = format!("{}\n",message);
        let stdin = match self.stdin.as_mut() {
            Some(stdin) => stdin,
            None => return Err(self.unavailable("not started")),
        };
        let result = stdin.write_all(line.as_bytes()).and_then(|_| stdin.flush());
        result.map_err(|e| self.unavailable(e))?;
        debug!(%message,"sent locomotion command");
        Ok(())
    }

    fn command(&mut self,name:&str) -> Result<(),DeviceError> {
        self.send(json!({"command":name}))
    }
}

impl Locomotion for ProcessLoco {

    fn start(&mut self,save_directory:Option<&Path>) -> Result<(),DeviceError> {
        if self.child.is_some() {
            return Ok(())
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = save_directory {
            cmd.arg("--save-dir").arg(PathBuf::from(dir));
        }
        let mut child = cmd.stdin(Stdio::piped()).spawn().map_err(|e| self.unavailable(e))?;
        self.stdin = child.stdin.take();
        self.child = Some(child);
        info!(program = %self.program,"locomotion started");
        self.command("start")
    }

    fn close(&mut self) -> Result<(),DeviceError> {
        if self.child.is_none() {
            return Ok(())
        }
        if let Err(e) = self.command("close") {
            warn!("{}",e);
        }
        // closing stdin lets the process exit on its own
        self.stdin = None;
        if let Some(child) = self.child.take() {
            self.reap(child)?;
        }
        info!(program = %self.program,"locomotion closed");
        Ok(())
    }

    fn set_pos_0(&mut self,theta_0:f64,x_0:f64,y_0:f64) -> Result<(),DeviceError> {
        self.send(json!({"command":"set_pos_0","theta_0":theta_0,"x_0":x_0,"y_0":y_0}))
    }

    fn loop_start(&mut self) -> Result<(),DeviceError> {
        self.command("loop_start")
    }

    fn loop_stop(&mut self) -> Result<(),DeviceError> {
        self.command("loop_stop")
    }

    fn loop_start_closed_loop(&mut self) -> Result<(),DeviceError> {
        self.command("loop_start_closed_loop")
    }

    fn loop_stop_closed_loop(&mut self) -> Result<(),DeviceError> {
        self.command("loop_stop_closed_loop")
    }

    fn loop_update_closed_loop_vars(&mut self,vars:&Map<String,Value>) -> Result<(),DeviceError> {
        self.send(json!({"command":"loop_update_closed_loop_vars","vars":vars}))
    }
}

impl Drop for ProcessLoco {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_before_start_are_refused(){
        let mut loco = ProcessLoco::new("loco",&[]);
        assert!(matches!(loco.loop_start(),Err(DeviceError::DeviceUnavailable(_))));
        // closing something that never started is a no-op
        loco.close().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn close_waits_for_a_clean_exit(){
        let args = vec![String::from("-c"),String::from("cat > /dev/null")];
        let mut loco = ProcessLoco::new("sh",&args);
        loco.start(None).unwrap();
        loco.loop_start().unwrap();
        loco.close().unwrap();
        assert!(matches!(loco.loop_stop(),Err(DeviceError::DeviceUnavailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn close_kills_a_tracker_that_ignores_eof(){
        let mut loco = ProcessLoco::new("sleep",&[String::from("30")])
            .with_close_grace(Duration::from_millis(50));
        loco.start(None).unwrap();
        let started = Instant::now();
        let err = loco.close().unwrap_err();
        assert!(matches!(err,DeviceError::DeviceUnavailable(ref m) if m.contains("did not exit")));
        assert!(started.elapsed() < Duration::from_secs(5));
        // nothing left to close
        loco.close().unwrap();
    }

    #[test]
    fn missing_program_is_unavailable(){
        let mut loco = LocoDescriptor { program:String::from("definitely-not-a-loco-program"), args:vec![] }.build();
        assert!(matches!(loco.start(None),Err(DeviceError::DeviceUnavailable(_))));
    }
}
