//! The UCI engine driver: one subprocess, one reader thread, and the
//! protocol state machine in between. The reader thread owns the blocking
//! pipe read and delivers computed moves through the sink the owning game
//! installed; non-urgent traffic (option advertisements, unknown chatter)
//! goes through a queue drained by `tick()` on the scheduler thread.

use crate::board::{Board, Mv, Side};
use crate::config::EngineConfig;
use crate::logfile::TextLog;
use crate::tc::{GameClock, TimeControlMode};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, trace, warn};
use regex::Regex;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

/// Ticks are ~500 ms apart, so 60 ticks of idleness between keepalive pings
/// and 60 ticks for a subprocess to finish its handshake.
const PING_IDLE_TICKS: i32 = 60;
const HANDSHAKE_TIMEOUT_TICKS: u32 = 60;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EngineState {
    None,
    Starting,
    Ready,
    Playing,
    Pondering,
    Stopped,
}

impl EngineState {
    fn from_u8(v: u8) -> EngineState {
        match v {
            1 => EngineState::Starting,
            2 => EngineState::Ready,
            3 => EngineState::Playing,
            4 => EngineState::Pondering,
            5 => EngineState::Stopped,
            _ => EngineState::None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            EngineState::None => 0,
            EngineState::Starting => 1,
            EngineState::Ready => 2,
            EngineState::Playing => 3,
            EngineState::Pondering => 4,
            EngineState::Stopped => 5,
        }
    }
}

/// Best line statistics scraped from `info` output.
#[derive(Copy, Clone, Debug, Default)]
pub struct SearchInfo {
    pub score: i32,
    pub depth: u32,
    pub nodes: u64,
}

/// What a driver hands back when the engine finished computing.
#[derive(Debug, Clone)]
pub struct MoveReport {
    pub mv_str: String,
    pub ponder_str: Option<String>,
    /// Seconds between `go` (or ponderhit) and the bestmove frame.
    pub elapsed: f64,
    pub info: SearchInfo,
    /// State before the frame arrived: `Playing` for a computed move,
    /// `Pondering` for a pondermiss delivered through `stop`.
    pub old_state: EngineState,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    BestMove(MoveReport),
    Resign,
}

/// Installed by the owning game; invoked on the reader thread.
pub type EventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Driver state shared with the reader thread.
struct EngineShared {
    name: String,
    command: String,
    state: AtomicU8,
    expecting_bestmove: AtomicBool,
    ponder_advertised: AtomicBool,
    stdin: Mutex<Option<ChildStdin>>,
    sink: Mutex<Option<EventSink>>,
    think_started: Mutex<Option<Instant>>,
    last_info: Mutex<SearchInfo>,
    pondering_on: Mutex<Option<Mv>>,
    /// `setoption` lines replayed after every `uciok`.
    option_lines: Vec<String>,
    log: Option<Arc<TextLog>>,
}

impl EngineShared {
    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn write_line(&self, line: &str) -> bool {
        let mut stdin = lock(&self.stdin);
        let Some(pipe) = stdin.as_mut() else {
            return false;
        };
        trace!("{} < {line}", self.name);
        if let Some(log) = &self.log {
            log.append(&format!("{}< {line}", self.name));
        }
        if writeln!(pipe, "{line}").and_then(|_| pipe.flush()).is_err() {
            error!("{} (cmd={}) pipe closed", self.name, self.command);
            self.set_state(EngineState::Stopped);
            return false;
        }
        true
    }

    fn handle_line(&self, line: &str, overflow: &Sender<String>) {
        trace!("{} > {line}", self.name);
        if let Some(log) = &self.log {
            log.append(&format!("{}> {line}", self.name));
        }

        if let Some(rest) = line.strip_prefix("info ") {
            let mut info = lock(&self.last_info);
            parse_info(rest, &mut info);
            return;
        }
        if line.starts_with("bestmove") {
            self.handle_bestmove(line);
            return;
        }
        match line {
            "uciok" => {
                self.set_state(EngineState::Ready);
                for option in &self.option_lines {
                    self.write_line(option);
                }
                self.write_line("isready");
            }
            "readyok" => {}
            _ => {
                let _ = overflow.send(line.to_string());
            }
        }
    }

    fn handle_bestmove(&self, line: &str) {
        if !self.expecting_bestmove.swap(false, Ordering::SeqCst) {
            warn!("{}: bestmove frame nobody asked for: {line}", self.name);
            return;
        }
        let old_state = self.state();
        let elapsed = lock(&self.think_started)
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.set_state(EngineState::Ready);

        let (mv_str, ponder_str) = parse_bestmove(line);
        let info = *lock(&self.last_info);
        let sink = lock(&self.sink).clone();
        let Some(sink) = sink else { return };

        if mv_str.is_empty() || mv_str == "(none)" || mv_str.eq_ignore_ascii_case("resign") {
            sink(EngineEvent::Resign);
        } else {
            sink(EngineEvent::BestMove(MoveReport {
                mv_str,
                ponder_str,
                elapsed,
                info,
                old_state,
            }));
        }
    }
}

fn reader_main(shared: Arc<EngineShared>, overflow: Sender<String>, stdout: ChildStdout) {
    let mut reader = BufReader::new(stdout);
    let mut buf = String::new();
    loop {
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = buf.trim();
        if line.is_empty() {
            continue;
        }
        shared.handle_line(line, &overflow);
    }
    trace!("{} (cmd={}) disconnected", shared.name, shared.command);
    shared.set_state(EngineState::Stopped);
}

pub struct UciEngine {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    rx: Receiver<String>,
    tx: Sender<String>,
    ponder_mode: bool,
    ping_countdown: i32,
    starting_ticks: u32,
}

impl UciEngine {
    pub fn new(config: EngineConfig, log: Option<Arc<TextLog>>) -> UciEngine {
        let (tx, rx) = unbounded();
        let option_lines = config
            .options
            .iter()
            .map(|o| format!("setoption name {} value {}", o.name, o.value_string()))
            .collect();
        let shared = Arc::new(EngineShared {
            name: config.name.clone(),
            command: config.command.clone(),
            state: AtomicU8::new(EngineState::None.as_u8()),
            expecting_bestmove: AtomicBool::new(false),
            ponder_advertised: AtomicBool::new(false),
            stdin: Mutex::new(None),
            sink: Mutex::new(None),
            think_started: Mutex::new(None),
            last_info: Mutex::new(SearchInfo::default()),
            pondering_on: Mutex::new(None),
            option_lines,
            log,
        });
        UciEngine {
            config,
            shared,
            child: None,
            reader: None,
            rx,
            tx,
            ponder_mode: false,
            ping_countdown: PING_IDLE_TICKS,
            starting_ticks: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn is_safe_to_detach(&self) -> bool {
        !self.shared.expecting_bestmove.load(Ordering::SeqCst)
    }

    /// Launches the subprocess if needed and (re)runs the handshake. A
    /// spawn failure leaves the driver `Stopped`, which the game reports as
    /// a crash.
    pub fn kick_start(&mut self) {
        if self.child.is_none() {
            if let Err(e) = self.spawn() {
                error!("cannot launch {} (cmd={}): {e}", self.name(), self.config.command);
                self.shared.set_state(EngineState::Stopped);
                return;
            }
        }
        self.starting_ticks = 0;
        self.shared.set_state(EngineState::Starting);
        self.shared.write_line("uci");
    }

    fn spawn(&mut self) -> std::io::Result<()> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.arguments);
        if !self.config.working_folder.is_empty() {
            cmd.current_dir(&self.config.working_folder);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout was piped");
        *lock(&self.shared.stdin) = child.stdin.take();
        let shared = self.shared.clone();
        let tx = self.tx.clone();
        self.reader = Some(
            std::thread::Builder::new()
                .name(format!("{}-reader", self.config.name))
                .spawn(move || reader_main(shared, tx, stdout))?,
        );
        self.child = Some(child);

        for line in &self.config.init_strings {
            self.shared.write_line(line);
        }
        Ok(())
    }

    pub fn attach(&mut self, sink: EventSink, ponder_mode: bool) {
        *lock(&self.shared.sink) = Some(sink);
        self.ponder_mode = ponder_mode;
    }

    pub fn detach(&mut self) {
        *lock(&self.shared.sink) = None;
        *lock(&self.shared.pondering_on) = None;
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.shared.sink).is_some()
    }

    /// Nudges a still-thinking engine towards a state it can be detached in.
    pub fn prepare_to_detach(&mut self) {
        if !self.is_safe_to_detach() {
            self.shared.write_line("stop");
        }
    }

    pub fn new_game(&mut self) {
        *lock(&self.shared.pondering_on) = None;
        *lock(&self.shared.last_info) = SearchInfo::default();
        self.shared.write_line("ucinewgame");
    }

    /// Requests a best move for the current position. When the engine is
    /// pondering this is the moment the guess resolves: a hit converts the
    /// ponder search, a miss stops it (the stale bestmove comes back marked
    /// `Pondering` and the game reissues `go`).
    pub fn go(&mut self, board: &dyn Board, clock: &GameClock) -> bool {
        if self.shared.state() == EngineState::Pondering {
            let hit = {
                let pondering = lock(&self.shared.pondering_on);
                match (*pondering, board.history().last()) {
                    (Some(guess), Some(last)) => guess == last.mv,
                    _ => false,
                }
            };
            return if hit {
                *lock(&self.shared.think_started) = Some(Instant::now());
                self.shared.set_state(EngineState::Playing);
                self.shared.write_line("ponderhit")
            } else {
                self.shared.write_line("stop")
            };
        }

        if self.shared.state() != EngineState::Ready
            || self.shared.expecting_bestmove.load(Ordering::SeqCst)
        {
            warn!("{}: go() refused, prior search not acknowledged", self.name());
            return false;
        }
        *lock(&self.shared.pondering_on) = None;
        *lock(&self.shared.last_info) = SearchInfo::default();
        self.shared.write_line(&position_command(board, None));
        *lock(&self.shared.think_started) = Some(Instant::now());
        self.shared.expecting_bestmove.store(true, Ordering::SeqCst);
        self.shared.set_state(EngineState::Playing);
        self.shared
            .write_line(&format!("go {}", go_params(clock, board.move_count())))
    }

    /// Starts thinking on the opponent's time under `guess`. Requires ponder
    /// mode and an engine that is either configured or self-advertised as
    /// ponder-capable.
    pub fn go_ponder(&mut self, guess: Option<Mv>, board: &dyn Board, clock: &GameClock) -> bool {
        if !self.ponder_mode {
            return false;
        }
        if !self.config.ponderable && !self.shared.ponder_advertised.load(Ordering::SeqCst) {
            return false;
        }
        let Some(guess) = guess else { return false };
        if self.shared.state() != EngineState::Ready
            || self.shared.expecting_bestmove.load(Ordering::SeqCst)
        {
            return false;
        }
        *lock(&self.shared.pondering_on) = Some(guess);
        *lock(&self.shared.last_info) = SearchInfo::default();
        self.shared
            .write_line(&position_command(board, Some(guess)));
        *lock(&self.shared.think_started) = Some(Instant::now());
        self.shared.expecting_bestmove.store(true, Ordering::SeqCst);
        self.shared.set_state(EngineState::Pondering);
        self.shared.write_line(&format!(
            "go ponder {}",
            go_params(clock, board.move_count() + 1)
        ))
    }

    pub fn stop_thinking(&mut self) -> bool {
        if self.shared.expecting_bestmove.load(Ordering::SeqCst) {
            return self.shared.write_line("stop");
        }
        false
    }

    pub fn quit(&mut self) {
        self.shared.write_line("quit");
    }

    pub fn kill(&mut self) {
        if let Some(child) = &mut self.child {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.shared.set_state(EngineState::Stopped);
    }

    /// Scheduler-side heartbeat: drains the reader queue, times out a stuck
    /// handshake, keeps an idle engine pinged and reaps a dead child.
    pub fn tick(&mut self) {
        while let Ok(line) = self.rx.try_recv() {
            self.digest_line(&line);
        }
        match self.shared.state() {
            EngineState::Starting => {
                self.starting_ticks += 1;
                if self.starting_ticks > HANDSHAKE_TIMEOUT_TICKS {
                    error!("{}: handshake never completed, giving up", self.name());
                    self.kill();
                }
            }
            EngineState::Ready => {
                self.ping_countdown -= 1;
                if self.ping_countdown < 0 {
                    self.ping_countdown = PING_IDLE_TICKS;
                    self.shared.write_line("isready");
                }
            }
            EngineState::Stopped => {
                if let Some(child) = &mut self.child {
                    let _ = child.try_wait();
                }
            }
            _ => {
                self.ping_countdown = PING_IDLE_TICKS;
            }
        }
    }

    fn digest_line(&mut self, line: &str) {
        if line.starts_with("option name") {
            if let Some(name) = option_name(line) {
                if name.eq_ignore_ascii_case("ponder") {
                    self.shared.ponder_advertised.store(true, Ordering::SeqCst);
                }
            }
        }
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        if let Some(child) = &mut self.child {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// `position startpos|fen …` followed by the applied moves and, while
/// pondering, the guessed reply.
fn position_command(board: &dyn Board, ponder: Option<Mv>) -> String {
    let mut s = String::from("position ");
    match board.starting_fen() {
        Some(fen) => {
            s.push_str("fen ");
            s.push_str(&fen);
        }
        None => s.push_str("startpos"),
    }
    if board.move_count() > 0 || ponder.is_some() {
        s.push_str(" moves");
    }
    for entry in board.history() {
        s.push(' ');
        s.push_str(&entry.mv.to_string());
    }
    if let Some(guess) = ponder {
        s.push(' ');
        s.push_str(&guess.to_string());
    }
    s
}

/// Clock part of the `go` command.
fn go_params(clock: &GameClock, half_move_cnt: usize) -> String {
    let tc = clock.control();
    match tc.mode {
        TimeControlMode::Infinite => String::from("infinite"),
        TimeControlMode::Depth => format!("depth {}", tc.depth),
        TimeControlMode::Movetime => format!("movetime {}", (tc.time * 1000.0) as i64),
        TimeControlMode::Standard => {
            let wtime = clock.time_left_ms(Side::White);
            let btime = clock.time_left_ms(Side::Black);
            let inc = (tc.increment * 1000.0) as i64;
            let mut s = format!("wtime {wtime} btime {btime} winc {inc} binc {inc}");
            if tc.moves > 0 {
                let full = half_move_cnt / 2;
                let movestogo = tc.moves as usize - full % tc.moves as usize;
                s.push_str(&format!(" movestogo {movestogo}"));
            }
            s
        }
    }
}

fn parse_bestmove(line: &str) -> (String, Option<String>) {
    let mut it = line.split_whitespace().skip(1);
    let mv = it.next().unwrap_or("").to_string();
    let ponder = match (it.next(), it.next()) {
        (Some("ponder"), Some(pm)) => Some(pm.to_string()),
        _ => None,
    };
    (mv, ponder)
}

fn parse_info(rest: &str, info: &mut SearchInfo) {
    let mut it = rest.split_whitespace();
    while let Some(tok) = it.next() {
        match tok {
            "string" => break,
            "depth" => {
                if let Some(v) = it.next().and_then(|v| v.parse::<u32>().ok()) {
                    info.depth = v;
                }
            }
            "nodes" => {
                if let Some(v) = it.next().and_then(|v| v.parse::<u64>().ok()) {
                    info.nodes = v;
                }
            }
            "score" => match it.next() {
                Some("cp") => {
                    if let Some(v) = it.next().and_then(|v| v.parse::<i32>().ok()) {
                        info.score = v;
                    }
                }
                Some("mate") => {
                    if let Some(v) = it.next().and_then(|v| v.parse::<i32>().ok()) {
                        info.score = if v >= 0 { 32000 - v } else { -32000 - v };
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
}

/// Extracts the advertised name from an `option name … type …` line.
fn option_name(line: &str) -> Option<String> {
    let re = Regex::new(r"^option name (.+?) type (check|spin|combo|button|string)").unwrap();
    let captures = re.captures(line)?;
    Some(captures.get(1)?.as_str().trim().to_string())
}
