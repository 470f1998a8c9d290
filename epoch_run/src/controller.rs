/*
    Epoch run controller.

    One run is: arm the rig, then for every epoch stage the stimuli, wait pre_time, start the stimulus and
    raise the corner square, wait stim_time, stop and drop the square, wait tail_time. The waits cannot be
    interrupted. Stop and pause are requested through a RunControl handle from any thread and are observed
    between epochs only.
 */
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use record::{ExperimentRecord, RecordError};
use rig_control::{Locomotion, StimClient, Trigger};
use stim_lib::{Protocol, ProtocolError, RunTiming, SelectorState};
use crate::error::{ErrorKind, RunError};

pub const DEFAULT_POLL_INTERVAL:Duration = Duration::from_millis(10);
const BACKGROUND_STIMULUS:&str = "ConstantBackground";

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum RunState {
    Idle,
    Arming,
    Running { epoch:usize },
    Paused { epoch:usize },
    Stopping,
    Finished,
    Failed(ErrorKind),
}

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum RunMode {
    View,
    Record { series:u32 },
}

#[derive(Debug)]
struct Status {
    state:RunState,
    mode:RunMode,
}

#[derive(Debug)]
struct ControlInner {
    stop:AtomicBool,
    pause:AtomicBool,
    status:Mutex<Status>,
}

/// Handle for stopping, pausing and watching a run from another thread.
#[derive(Clone,Debug)]
pub struct RunControl {
    inner:Arc<ControlInner>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self {
            inner:Arc::new(ControlInner {
                stop:AtomicBool::new(false),
                pause:AtomicBool::new(false),
                status:Mutex::new(Status { state:RunState::Idle, mode:RunMode::View }),
            })
        }
    }
}

impl RunControl {

    pub fn stop(&self) {
        self.inner.stop.store(true,Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.inner.pause.store(true,Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.pause.store(false,Ordering::SeqCst);
    }

    pub fn state(&self) -> RunState {
        self.inner.status.lock().state
    }

    pub fn status_line(&self) -> String {
        let status = self.inner.status.lock();
        match (status.state,status.mode) {
            (RunState::Idle,_) | (RunState::Finished,_) => String::from("Ready"),
            (RunState::Arming,RunMode::View) | (RunState::Running{..},RunMode::View) => String::from("Viewing..."),
            (RunState::Arming,RunMode::Record{series}) | (RunState::Running{..},RunMode::Record{series}) => format!("Recording series {}",series),
            (RunState::Paused{..},_) => String::from("Paused..."),
            (RunState::Stopping,_) => String::from("Stopping"),
            (RunState::Failed(kind),_) => format!("Failed: {}",kind),
        }
    }

    fn set_state(&self,state:RunState) {
        debug!(?state,"run state");
        self.inner.status.lock().state = state;
    }

    /// stop and pause requests made before the run started do not carry into it
    fn begin(&self,mode:RunMode) {
        self.inner.stop.store(false,Ordering::SeqCst);
        self.inner.pause.store(false,Ordering::SeqCst);
        let mut status = self.inner.status.lock();
        status.mode = mode;
        status.state = RunState::Arming;
    }

    fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    fn pause_requested(&self) -> bool {
        self.inner.pause.load(Ordering::SeqCst)
    }
}

#[derive(Clone,Debug,PartialEq)]
pub struct RunOptions {
    pub trigger_on_epoch_run:bool,
    pub trigger_on_epoch:bool,
    pub trigger_channel:u32,
    pub poll_interval:Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            trigger_on_epoch_run:true,
            trigger_on_epoch:false,
            trigger_channel:0,
            poll_interval:DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct RunSummary {
    pub series:Option<u32>,
    pub epochs_completed:usize,
    pub stopped:bool,
}

/// called with the number of completed epochs after every tail
pub type EpochListener = Box<dyn FnMut(usize) + Send>;

/// what has to be undone when the run ends
#[derive(Default)]
struct Armed {
    renderer:bool,
    locomotion:bool,
    closed_loop:bool,
    idle_color:f64,
}

pub struct Controller {
    client:StimClient,
    trigger:Box<dyn Trigger>,
    locomotion:Option<Box<dyn Locomotion>>,
    options:RunOptions,
    control:RunControl,
    selectors:SelectorState,
    listener:Option<EpochListener>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("options",&self.options)
            .field("state",&self.control.state())
            .field("locomotion",&self.locomotion.is_some())
            .finish()
    }
}

impl Controller {

    pub fn new(client:StimClient,trigger:Box<dyn Trigger>) -> Self {
        Self {
            client,
            trigger,
            locomotion:None,
            options:RunOptions::default(),
            control:RunControl::default(),
            selectors:SelectorState::new(),
            listener:None,
        }
    }

    pub fn with_locomotion(mut self,locomotion:Box<dyn Locomotion>) -> Self {
        self.locomotion = Some(locomotion);
        self
    }

    pub fn with_options(mut self,options:RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_selectors(mut self,selectors:SelectorState) -> Self {
        self.selectors = selectors;
        self
    }

    /// share an existing control handle, e.g. one the front-end created before the renderer was up
    pub fn with_control(mut self,control:RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn on_epoch(mut self,listener:EpochListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run the protocol. With a record the run is saved as a new series under the current subject.
    pub fn run(&mut self,protocol:&mut Protocol,record:Option<&mut ExperimentRecord>) -> Result<RunSummary,RunError> {
        let mode = match &record {
            Some(r) => RunMode::Record { series:r.series_count() },
            None => RunMode::View,
        };
        self.control.begin(mode);
        info!(protocol = %protocol.id(),?mode,"starting run");

        let mut armed = Armed::default();
        let result = self.arm_and_run(protocol,record,&mut armed);

        match result {
            Ok(summary) => {
                self.control.set_state(RunState::Stopping);
                if let Err(e) = self.teardown(&armed) {
                    warn!(kind = %e.kind(),"teardown failed: {}",e);
                    self.control.set_state(RunState::Failed(e.kind()));
                    return Err(e)
                }
                self.control.set_state(RunState::Finished);
                info!(epochs = summary.epochs_completed,stopped = summary.stopped,"run finished");
                self.control.set_state(RunState::Idle);
                Ok(summary)
            }
            Err(e) => {
                warn!(kind = %e.kind(),"run failed: {}",e);
                self.control.set_state(RunState::Stopping);
                self.recover(&armed);
                self.control.set_state(RunState::Failed(e.kind()));
                Err(e)
            }
        }
    }

    fn arm_and_run(&mut self,protocol:&mut Protocol,mut record:Option<&mut ExperimentRecord>,armed:&mut Armed) -> Result<RunSummary,RunError> {
        let timing = protocol.prepare_run(&mut self.selectors)?;
        if let Some(r) = record.as_deref() {
            check_record_ready(r)?;
        }

        self.client.set_idle_background(timing.idle_color)?;
        armed.renderer = true;
        armed.idle_color = timing.idle_color;

        let series = match record.as_deref_mut() {
            Some(r) => Some(r.create_series(protocol)?),
            None => None,
        };

        let closed_loop = protocol.supports_closed_loop();
        if let (Some(loco),true) = (self.locomotion.as_mut(),timing.do_loco) {
            let save_dir = match (record.as_deref(),series) {
                (Some(r),Some(series)) => r.file().parent().map(|dir| dir.join(format!("loco_{}",utils::series_name(series)))),
                _=> None::<PathBuf>,
            };
            loco.start(save_dir.as_deref())?;
            armed.locomotion = true;
        }

        if self.options.trigger_on_epoch_run {
            self.trigger.send_trigger(self.options.trigger_channel)?;
        }

        if let (Some(loco),true) = (self.locomotion.as_mut(),armed.locomotion && closed_loop) {
            loco.loop_start()?;
            loco.loop_start_closed_loop()?;
            armed.closed_loop = true;
        }

        let stopped = self.epoch_loop(protocol,record.as_deref(),&timing,armed.closed_loop)?;
        Ok(RunSummary {
            series,
            epochs_completed:protocol.num_epochs_completed(),
            stopped,
        })
    }

    /// returns true when the run ended on a stop request
    fn epoch_loop(&mut self,protocol:&mut Protocol,record:Option<&ExperimentRecord>,timing:&RunTiming,closed_loop:bool) -> Result<bool,RunError> {
        loop {
            let k = protocol.num_epochs_completed();
            if k >= timing.num_epochs {
                return Ok(false)
            }
            self.control.set_state(RunState::Running { epoch:k });
            if self.control.stop_requested() {
                info!(epoch = k,"stop requested");
                return Ok(true)
            }
            if self.control.pause_requested() && self.wait_while_paused(k) {
                return Ok(true)
            }

            let stimuli = protocol.get_epoch_parameters(&mut self.selectors)?.stimuli.clone();
            protocol.check_required_epoch_keys()?;

            if let Some(r) = record {
                r.create_epoch(protocol)?;
            }
            if self.options.trigger_on_epoch {
                self.trigger.send_trigger(self.options.trigger_channel)?;
            }

            // markers count from 1, like the epoch nodes
            self.client.print_on_server(&format!("Epoch {}",k + 1))?;
            let mut batch = self.client.batch().load_stim(background(timing.idle_color),false);
            for stimulus in stimuli {
                batch = batch.load_stim(stimulus,true);
            }
            batch.close()?;

            if closed_loop {
                if let (Some(loco),Some(epoch)) = (self.locomotion.as_mut(),protocol.current_epoch()) {
                    loco.loop_update_closed_loop_vars(&epoch.convenience)?;
                }
            }

            self.hold(timing.pre_time)?;
            self.client.batch().start_stim().start_corner_square().close()?;
            self.hold(timing.stim_time)?;
            self.client.batch().stop_stim().black_corner_square().close()?;
            self.hold(timing.tail_time)?;

            protocol.advance_epoch_counter();
            let completed = protocol.num_epochs_completed();
            debug!(epoch = completed,"epoch complete");
            if let Some(listener) = self.listener.as_mut() {
                listener(completed);
            }
        }
    }

    /// returns true when stop arrives while paused
    fn wait_while_paused(&self,epoch:usize) -> bool {
        info!(epoch,"run paused");
        self.control.set_state(RunState::Paused { epoch });
        while self.control.pause_requested() {
            if self.control.stop_requested() {
                return true
            }
            sleep(self.options.poll_interval);
        }
        info!(epoch,"run resumed");
        self.control.set_state(RunState::Running { epoch });
        self.control.stop_requested()
    }

    /// sleep until the deadline, in steps no longer than the poll interval
    fn hold(&self,seconds:f64) -> Result<(),RunError> {
        let out_of_range = || ProtocolError::InvalidRunParameters(format!("cannot wait {} seconds",seconds));
        let length = Duration::try_from_secs_f64(seconds).map_err(|_| out_of_range())?;
        let deadline = Instant::now().checked_add(length).ok_or_else(out_of_range)?;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(())
            }
            sleep((deadline - now).min(self.options.poll_interval));
        }
    }

    fn release_locomotion(&mut self,armed:&Armed) -> Result<(),RunError> {
        if let Some(loco) = self.locomotion.as_mut() {
            if armed.closed_loop {
                loco.loop_stop_closed_loop()?;
                loco.loop_stop()?;
            }
            if armed.locomotion {
                loco.close()?;
            }
        }
        Ok(())
    }

    fn teardown(&mut self,armed:&Armed) -> Result<(),RunError> {
        if armed.renderer {
            self.client.black_corner_square()?;
        }
        self.release_locomotion(armed)?;
        info!("Stopping run.");
        Ok(())
    }

    /// best effort teardown after a failure. Problems here are logged, the original error is what is reported.
    fn recover(&mut self,armed:&Armed) {
        if armed.renderer {
            if let Err(e) = self.client.set_idle_background(armed.idle_color) {
                warn!("could not restore idle background: {}",e);
            }
            if let Err(e) = self.client.black_corner_square() {
                warn!("could not clear corner square: {}",e);
            }
        }
        if let Err(e) = self.release_locomotion(armed) {
            warn!("could not release locomotion: {}",e);
        }
        info!("Stopping run.");
    }
}

fn background(color:f64) -> Map<String,Value> {
    let mut params = Map::new();
    params.insert("name".into(),json!(BACKGROUND_STIMULUS));
    params.insert("color".into(),json!(color));
    params
}

/// a record run needs an initialised file, a subject and a free series number
fn check_record_ready(record:&ExperimentRecord) -> Result<(),RunError> {
    if !record.exists() {
        return Err(RecordError::NotInitialized.into())
    }
    if record.current_subject().is_none() {
        return Err(RecordError::NoSubject.into())
    }
    let series = record.series_count();
    if record.get_existing_series()?.contains(&series) {
        return Err(RecordError::SeriesCollision(series).into())
    }
    Ok(())
}
