/*
    Client side of the stimulus renderer.

    Every request is a batch: a json array of commands on one line. The renderer answers each batch with
    one line {"ok": bool, "error": string?}. Single verbs are batches of one. A Batch collects commands and
    dispatches them together on close, so no other message can land between them.
 */
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::time::Instant;
use parking_lot::Mutex;
use serde::{Serialize,Deserialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use crate::error::RendererError;

pub const DEFAULT_HOST:&str = "127.0.0.1";
pub const DEFAULT_PORT:u16 = 60629;
pub const DEFAULT_LOCAL_RENDERER:&str = "stim_server";

#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RenderCommand {
    LoadStim { params:Map<String,Value>, hold:bool },
    StartStim,
    StopStim,
    StartCornerSquare,
    BlackCornerSquare,
    SetIdleBackground { color:f64 },
    PrintOnServer { text:String },
}

#[derive(Debug,Serialize,Deserialize)]
struct Reply {
    ok:bool,
    #[serde(default)]
    error:Option<String>,
}

pub trait RenderTransport: Send {
    fn dispatch(&mut self,batch:&[RenderCommand]) -> Result<(),RendererError>;
}

/// request/response over any line oriented byte stream
pub struct LineChannel<R:BufRead,W:Write> {
    reader:R,
    writer:W,
}

impl<R:BufRead,W:Write> LineChannel<R,W> {

    pub fn new(reader:R,writer:W) -> Self {
        Self { reader, writer }
    }

    fn exchange(&mut self,batch:&[RenderCommand]) -> Result<(),RendererError> {
        let mut line = serde_json::to_string(batch)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            return Err(RendererError::Transport(io::Error::new(io::ErrorKind::UnexpectedEof,"renderer closed the channel")))
        }
        let reply:Reply = serde_json::from_str(reply.trim())?;
        match reply.ok {
            true => Ok(()),
            false => Err(RendererError::Rejected(reply.error.unwrap_or_else(|| String::from("no reason given"))))
        }
    }
}

/// remote renderer
pub struct TcpTransport {
    channel:LineChannel<BufReader<TcpStream>,TcpStream>,
}

impl TcpTransport {
    pub fn connect(host:&str,port:u16) -> Result<Self,RendererError> {
        let stream = TcpStream::connect((host,port))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        info!(host,port,"connected to renderer");
        Ok(Self { channel:LineChannel::new(reader,stream) })
    }
}

impl RenderTransport for TcpTransport {
    fn dispatch(&mut self,batch:&[RenderCommand]) -> Result<(),RendererError> {
        self.channel.exchange(batch)
    }
}

/// renderer launched as a child process, spoken to over its stdin and stdout
pub struct ProcessTransport {
    child:Child,
    channel:LineChannel<BufReader<ChildStdout>,ChildStdin>,
}

impl ProcessTransport {
    pub fn launch(program:&str,args:&[String]) -> Result<Self,RendererError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe,"renderer stdin unavailable"))?;
        let stdout = child.stdout.take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe,"renderer stdout unavailable"))?;
        info!(program,"launched local renderer");
        Ok(Self { child, channel:LineChannel::new(BufReader::new(stdout),stdin) })
    }
}

impl RenderTransport for ProcessTransport {
    fn dispatch(&mut self,batch:&[RenderCommand]) -> Result<(),RendererError> {
        self.channel.exchange(batch)
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Clone,Debug)]
pub struct DispatchedBatch {
    pub at:Instant,
    pub commands:Vec<RenderCommand>,
}

/// Keeps every batch with the time it was dispatched. Used for dry runs and to check ordering.
#[derive(Clone,Default)]
pub struct RecordingTransport {
    log:Arc<Mutex<Vec<DispatchedBatch>>>,
    fail_after:Option<usize>,
}

impl RecordingTransport {

    pub fn new() -> Self {
        Self::default()
    }

    /// accept n batches, then report a broken channel
    pub fn failing_after(n:usize) -> Self {
        Self {
            log:Arc::default(),
            fail_after:Some(n),
        }
    }

    pub fn batches(&self) -> Vec<DispatchedBatch> {
        self.log.lock().clone()
    }

    /// every command in dispatch order with its batch time
    pub fn commands(&self) -> Vec<(Instant,RenderCommand)> {
        self.log.lock().iter()
            .flat_map(|b| b.commands.iter().map(move |c| (b.at,c.clone())))
            .collect()
    }

    pub fn last_idle_background(&self) -> Option<f64> {
        self.commands().into_iter().rev().find_map(|(_,c)| match c {
            RenderCommand::SetIdleBackground { color } => Some(color),
            _=> None
        })
    }
}

impl RenderTransport for RecordingTransport {
    fn dispatch(&mut self,batch:&[RenderCommand]) -> Result<(),RendererError> {
        let mut log = self.log.lock();
        if let Some(n) = self.fail_after {
            if log.len() >= n {
                return Err(RendererError::Transport(io::Error::new(io::ErrorKind::BrokenPipe,"recording transport closed")))
            }
        }
        log.push(DispatchedBatch { at:Instant::now(), commands:batch.to_vec() });
        Ok(())
    }
}

pub struct StimClient {
    transport:Box<dyn RenderTransport>,
}

impl StimClient {

    pub fn new(transport:Box<dyn RenderTransport>) -> Self {
        Self { transport }
    }

    pub fn connect(host:&str,port:u16) -> Result<Self,RendererError> {
        Ok(Self::new(Box::new(TcpTransport::connect(host,port)?)))
    }

    pub fn launch(program:&str) -> Result<Self,RendererError> {
        Ok(Self::new(Box::new(ProcessTransport::launch(program,&[])?)))
    }

    fn send(&mut self,commands:Vec<RenderCommand>) -> Result<(),RendererError> {
        debug!(count = commands.len(),"dispatching renderer batch");
        self.transport.dispatch(&commands)
    }

    pub fn load_stim(&mut self,params:Map<String,Value>,hold:bool) -> Result<(),RendererError> {
        self.send(vec![RenderCommand::LoadStim { params, hold }])
    }

    pub fn start_stim(&mut self) -> Result<(),RendererError> {
        self.send(vec![RenderCommand::StartStim])
    }

    pub fn stop_stim(&mut self) -> Result<(),RendererError> {
        self.send(vec![RenderCommand::StopStim])
    }

    pub fn start_corner_square(&mut self) -> Result<(),RendererError> {
        self.send(vec![RenderCommand::StartCornerSquare])
    }

    pub fn black_corner_square(&mut self) -> Result<(),RendererError> {
        self.send(vec![RenderCommand::BlackCornerSquare])
    }

    pub fn set_idle_background(&mut self,color:f64) -> Result<(),RendererError> {
        self.send(vec![RenderCommand::SetIdleBackground { color }])
    }

    pub fn print_on_server(&mut self,text:&str) -> Result<(),RendererError> {
        self.send(vec![RenderCommand::PrintOnServer { text:text.to_string() }])
    }

    pub fn batch(&mut self) -> Batch<'_> {
        Batch { client:self, commands:vec![] }
    }
}

/// Commands collected here go out as one request on close. Dropping a batch without closing it sends nothing.
pub struct Batch<'a> {
    client:&'a mut StimClient,
    commands:Vec<RenderCommand>,
}

impl Batch<'_> {

    pub fn load_stim(mut self,params:Map<String,Value>,hold:bool) -> Self {
        self.commands.push(RenderCommand::LoadStim { params, hold });
        self
    }

    pub fn start_stim(mut self) -> Self {
        self.commands.push(RenderCommand::StartStim);
        self
    }

    pub fn stop_stim(mut self) -> Self {
        self.commands.push(RenderCommand::StopStim);
        self
    }

    pub fn start_corner_square(mut self) -> Self {
        self.commands.push(RenderCommand::StartCornerSquare);
        self
    }

    pub fn black_corner_square(mut self) -> Self {
        self.commands.push(RenderCommand::BlackCornerSquare);
        self
    }

    pub fn close(self) -> Result<(),RendererError> {
        self.client.send(self.commands)
    }
}
