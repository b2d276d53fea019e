//! Input providers: named value sources bound to a template placeholder

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use tokio::sync::Notify;

use super::encoding::EncoderChain;
use crate::error::ConfigError;

/// Default keyword for providers configured without one
pub const DEFAULT_KEYWORD: &str = "FUZZ";

/// Extension placeholder used by dirsearch style wordlists
pub const EXTENSION_TOKEN: &str = "%EXT%";

/// Positionally addressable value backend
#[async_trait]
pub trait InputSource: Send + Sync + fmt::Debug {
    /// Number of values, `None` when unknown in advance
    fn cardinality(&self) -> Option<usize>;

    /// Value at `index` without disturbing any iteration state.
    /// `None` past the end.
    fn value_at(&self, index: usize) -> Option<String>;

    /// Wait until `index` can be answered by [`InputSource::value_at`]
    /// without blocking. Static sources are always ready.
    async fn prepare(&self, _index: usize) {}
}

/// Static, line-delimited values
#[derive(Debug, Clone)]
pub struct Wordlist {
    /// Name of the wordlist (usually its path)
    pub name: String,
    words: Vec<String>,
}

impl Wordlist {
    /// Create a wordlist from in-memory values
    pub fn new(name: &str, words: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            words,
        }
    }

    /// Load values from a wordlist file, skipping empty lines
    pub fn from_file(path: &Path, ignore_comments: bool) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|e| ConfigError::Wordlist {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let reader = BufReader::new(file);

        let mut words = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| ConfigError::Wordlist {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() || (ignore_comments && line.starts_with('#')) {
                continue;
            }
            words.push(line.to_string());
        }

        Ok(Self::new(&path.display().to_string(), words))
    }

    /// Expand with extensions. In dirsearch mode words carrying `%EXT%` are
    /// expanded once per extension and other words are kept as-is; otherwise
    /// every word is followed by `word + ext` for each extension.
    pub fn with_extensions(self, extensions: &[String], dirsearch_compat: bool) -> Self {
        if extensions.is_empty() {
            return self;
        }

        let mut words = Vec::with_capacity(self.words.len() * (extensions.len() + 1));
        for word in self.words {
            if dirsearch_compat {
                if word.contains(EXTENSION_TOKEN) {
                    for ext in extensions {
                        let ext = ext.trim_start_matches('.');
                        words.push(word.replace(EXTENSION_TOKEN, ext));
                    }
                } else {
                    words.push(word);
                }
            } else {
                let expanded: Vec<String> =
                    extensions.iter().map(|ext| format!("{}{}", word, ext)).collect();
                words.push(word);
                words.extend(expanded);
            }
        }

        Self {
            name: self.name,
            words,
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }
}

impl InputSource for Wordlist {
    fn cardinality(&self) -> Option<usize> {
        Some(self.words.len())
    }

    fn value_at(&self, index: usize) -> Option<String> {
        self.words.get(index).cloned()
    }
}

/// Lines an unbounded command keeps behind the furthest position asked for
pub const COMMAND_WINDOW: usize = 4096;

/// Values produced line by line by an external command.
///
/// The command starts on first use and is read on a dedicated thread. A
/// limited command is read up to its limit and every line is kept. An
/// unbounded command is read at most one window ahead of the furthest
/// position asked for, and only one window is kept behind it. Asking for an
/// evicted position re-runs the command.
pub struct CommandSource {
    command: String,
    limit: Option<usize>,
    window: usize,
    shared: Arc<CommandShared>,
}

struct CommandShared {
    state: Mutex<CommandState>,
    changed: Condvar,
    ready: Notify,
}

#[derive(Default)]
struct CommandState {
    child: Option<Child>,
    started: bool,
    /// Bumped on every re-run; readers of an older run exit
    generation: u64,
    /// Position of `lines[0]`
    base: usize,
    lines: VecDeque<String>,
    /// One past the furthest position asked for
    requested: usize,
    finished: bool,
    counted: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Ready,
    End,
    Evicted,
    Pending,
}

impl CommandState {
    fn end(&self) -> usize {
        self.base + self.lines.len()
    }

    fn slot(&self, index: usize, limit: Option<usize>) -> Slot {
        if limit.is_some_and(|limit| index >= limit) {
            Slot::End
        } else if index < self.base {
            Slot::Evicted
        } else if index < self.end() {
            Slot::Ready
        } else if self.finished {
            Slot::End
        } else {
            Slot::Pending
        }
    }

    fn line(&self, index: usize) -> Option<String> {
        index
            .checked_sub(self.base)
            .and_then(|offset| self.lines.get(offset))
            .cloned()
    }

    /// Record interest in `index` and drop lines that fell out of the window
    fn request(&mut self, index: usize, window: Option<usize>) {
        self.requested = self.requested.max(index + 1);
        self.evict(window);
    }

    fn evict(&mut self, window: Option<usize>) {
        if let Some(window) = window {
            let keep_from = self.requested.saturating_sub(window);
            while self.base < keep_from && self.lines.pop_front().is_some() {
                self.base += 1;
            }
        }
    }

    fn has_room(&self, limit: Option<usize>, window: Option<usize>) -> bool {
        match (limit, window) {
            (Some(limit), _) => self.end() < limit,
            (None, Some(window)) => self.end() < self.requested + window,
            (None, None) => true,
        }
    }

    fn stop_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl CommandShared {
    fn wake(&self) {
        self.changed.notify_all();
        self.ready.notify_waiters();
    }

    /// Reader thread body for one run of the command
    fn read(
        &self,
        stdout: ChildStdout,
        generation: u64,
        limit: Option<usize>,
        window: Option<usize>,
        command: &str,
    ) {
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(command = %command, error = %e, "Input command output unreadable");
                    break;
                }
            };

            let mut state = self.state.lock();
            while state.generation == generation && !state.has_room(limit, window) {
                self.changed.wait(&mut state);
            }
            if state.generation != generation {
                return;
            }
            state.lines.push_back(line);
            state.evict(window);
            let full = limit.is_some_and(|limit| state.end() >= limit);
            if full {
                state.finished = true;
                state.stop_child();
            }
            drop(state);
            self.wake();
            if full {
                return;
            }
        }

        let mut state = self.state.lock();
        if state.generation == generation {
            state.finished = true;
            state.stop_child();
            tracing::trace!(command = %command, lines = state.end(), "Input command finished");
        }
        drop(state);
        self.wake();
    }
}

impl CommandSource {
    /// `limit` caps the number of values read from the command
    pub fn new(command: &str, limit: Option<usize>) -> Self {
        Self {
            command: command.to_string(),
            limit,
            window: COMMAND_WINDOW,
            shared: Arc::new(CommandShared {
                state: Mutex::new(CommandState::default()),
                changed: Condvar::new(),
                ready: Notify::new(),
            }),
        }
    }

    /// Lines kept around the read position of an unbounded command
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Eviction window; limited commands keep everything they read
    fn window(&self) -> Option<usize> {
        self.limit.is_none().then_some(self.window)
    }

    fn spawn(&self) -> std::io::Result<Child> {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.command);
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
            let mut cmd = Command::new(shell);
            cmd.arg("-c").arg(&self.command);
            cmd
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
    }

    /// Start the command and its reader thread unless already running
    fn ensure_started(&self, state: &mut CommandState) {
        if state.started {
            return;
        }
        state.started = true;

        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command = %self.command, error = %e, "Failed to start input command");
                state.finished = true;
                return;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            state.finished = true;
            return;
        };
        state.child = Some(child);

        let shared = self.shared.clone();
        let generation = state.generation;
        let (limit, window) = (self.limit, self.window());
        let command = self.command.clone();
        let spawned = std::thread::Builder::new()
            .name("input-command".to_string())
            .spawn(move || shared.read(stdout, generation, limit, window, &command));
        if let Err(e) = spawned {
            tracing::warn!(command = %self.command, error = %e, "Failed to start input reader");
            state.finished = true;
            state.stop_child();
        }
    }

    /// Re-run the command from the first line
    fn restart(&self, state: &mut CommandState, index: usize) {
        tracing::debug!(command = %self.command, index, "Re-running input command");
        state.generation += 1;
        state.stop_child();
        state.started = false;
        state.finished = false;
        state.base = 0;
        state.lines.clear();
        state.requested = 0;
        state.request(index, self.window());
        self.shared.wake();
    }

    /// Lines currently held in memory
    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.shared.state.lock().lines.len()
    }
}

impl fmt::Debug for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSource")
            .field("command", &self.command)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish()
    }
}

#[async_trait]
impl InputSource for CommandSource {
    /// A limited command is read to its limit or its end first, so the
    /// count is the number of values it really produces
    fn cardinality(&self) -> Option<usize> {
        let limit = self.limit?;
        let mut state = self.shared.state.lock();
        if let Some(count) = state.counted {
            return Some(count);
        }
        while !state.finished {
            if !state.started {
                self.ensure_started(&mut state);
                continue;
            }
            self.shared.changed.wait(&mut state);
        }
        let count = state.end().min(limit);
        state.counted = Some(count);
        Some(count)
    }

    fn value_at(&self, index: usize) -> Option<String> {
        let mut state = self.shared.state.lock();
        state.request(index, self.window());
        self.shared.changed.notify_all();
        loop {
            match state.slot(index, self.limit) {
                Slot::Ready => return state.line(index),
                Slot::End => return None,
                Slot::Evicted => self.restart(&mut state, index),
                Slot::Pending if !state.started => self.ensure_started(&mut state),
                Slot::Pending => self.shared.changed.wait(&mut state),
            }
        }
    }

    async fn prepare(&self, index: usize) {
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                state.request(index, self.window());
                if state.slot(index, self.limit) == Slot::Evicted {
                    self.restart(&mut state, index);
                }
                if state.slot(index, self.limit) == Slot::Pending {
                    self.ensure_started(&mut state);
                }
                if state.slot(index, self.limit) != Slot::Pending {
                    return;
                }
            }
            self.shared.changed.notify_all();
            notified.await;
        }
    }
}

impl Drop for CommandSource {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.stop_child();
        drop(state);
        self.shared.wake();
    }
}

/// Kind of backend behind a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Wordlist,
    Command,
}

/// Where a provider's values go in the template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Replaced wherever the token appears
    Keyword(String),
    /// One marker occurrence at a time (sniper mode)
    Marker(char),
}

impl Binding {
    /// The literal placeholder text in a template
    pub fn placeholder(&self) -> String {
        match self {
            Binding::Keyword(keyword) => keyword.clone(),
            Binding::Marker(marker) => marker.to_string(),
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.placeholder())
    }
}

/// A value source bound to a placeholder, with an optional encoder chain
#[derive(Debug, Clone)]
pub struct InputProvider {
    pub kind: ProviderKind,
    pub binding: Binding,
    pub encoder: EncoderChain,
    source: Arc<dyn InputSource>,
}

impl InputProvider {
    /// Provider backed by a wordlist
    pub fn wordlist(binding: Binding, wordlist: Wordlist) -> Self {
        Self {
            kind: ProviderKind::Wordlist,
            binding,
            encoder: EncoderChain::default(),
            source: Arc::new(wordlist),
        }
    }

    /// Provider backed by an external command
    pub fn command(binding: Binding, source: CommandSource) -> Self {
        Self {
            kind: ProviderKind::Command,
            binding,
            encoder: EncoderChain::default(),
            source: Arc::new(source),
        }
    }

    /// Provider over any backend
    pub fn from_source(kind: ProviderKind, binding: Binding, source: Arc<dyn InputSource>) -> Self {
        Self {
            kind,
            binding,
            encoder: EncoderChain::default(),
            source,
        }
    }

    pub fn with_encoder(mut self, encoder: EncoderChain) -> Self {
        self.encoder = encoder;
        self
    }

    /// Keyword this provider is bound to, if keyword-bound
    pub fn keyword(&self) -> Option<&str> {
        match &self.binding {
            Binding::Keyword(keyword) => Some(keyword),
            Binding::Marker(_) => None,
        }
    }

    pub fn cardinality(&self) -> Option<usize> {
        self.source.cardinality()
    }

    pub async fn prepare(&self, index: usize) {
        self.source.prepare(index).await
    }

    /// Value before encoding
    pub fn raw_value_at(&self, index: usize) -> Option<String> {
        self.source.value_at(index)
    }

    /// Value after the encoder chain
    pub fn value_at(&self, index: usize) -> Option<String> {
        self.raw_value_at(index).map(|raw| self.encoder.apply(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn words(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_wordlist_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "admin\r\n# comment\n\nlogin").unwrap();

        let list = Wordlist::from_file(file.path(), true).unwrap();
        assert_eq!(list.words(), &words(&["admin", "login"]));

        let list = Wordlist::from_file(file.path(), false).unwrap();
        assert_eq!(list.words(), &words(&["admin", "# comment", "login"]));
    }

    #[test]
    fn test_missing_wordlist() {
        let err = Wordlist::from_file(Path::new("/nonexistent/words.txt"), false).unwrap_err();
        assert!(matches!(err, ConfigError::Wordlist { .. }));
    }

    #[test]
    fn test_extensions() {
        let list = Wordlist::new("w", words(&["index", "admin"]))
            .with_extensions(&words(&[".php", ".bak"]), false);
        assert_eq!(
            list.words(),
            &words(&["index", "index.php", "index.bak", "admin", "admin.php", "admin.bak"])
        );
    }

    #[test]
    fn test_dirsearch_extensions() {
        let list = Wordlist::new("w", words(&["index.%EXT%", "admin"]))
            .with_extensions(&words(&[".php", "asp"]), true);
        assert_eq!(list.words(), &words(&["index.php", "index.asp", "admin"]));
    }

    #[test]
    fn test_provider_encodes_values() {
        let provider = InputProvider::wordlist(
            Binding::Keyword("FUZZ".into()),
            Wordlist::new("w", words(&["a b"])),
        )
        .with_encoder("urlencode".parse().unwrap());

        assert_eq!(provider.raw_value_at(0).as_deref(), Some("a b"));
        assert_eq!(provider.value_at(0).as_deref(), Some("a%20b"));
        assert_eq!(provider.value_at(1), None);
        assert_eq!(provider.cardinality(), Some(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_source_is_addressable() {
        let source = CommandSource::new("printf 'one\\ntwo\\nthree\\n'", None);
        assert_eq!(source.cardinality(), None);
        assert_eq!(source.value_at(2).as_deref(), Some("three"));
        // cached lines stay addressable after the process is gone
        assert_eq!(source.value_at(0).as_deref(), Some("one"));
        assert_eq!(source.value_at(3), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_source_limit() {
        let source = CommandSource::new("seq 1 100", Some(3));
        assert_eq!(source.cardinality(), Some(3));
        assert_eq!(source.value_at(2).as_deref(), Some("3"));
        assert_eq!(source.value_at(3), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_source_limit_above_output() {
        let source = CommandSource::new("printf 'x\\ny\\n'", Some(5));
        assert_eq!(source.cardinality(), Some(2));
        assert_eq!(source.value_at(1).as_deref(), Some("y"));
        assert_eq!(source.value_at(2), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_source_keeps_a_window() {
        let source = CommandSource::new("seq 1 1000000", None).with_window(16);
        for index in 0..5000 {
            assert_eq!(source.value_at(index), Some((index + 1).to_string()));
            assert!(source.buffered() <= 32, "{} lines buffered at {}", source.buffered(), index);
        }

        // evicted positions re-run the command
        assert_eq!(source.value_at(0).as_deref(), Some("1"));
        assert_eq!(source.value_at(1).as_deref(), Some("2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_prepare_yields_to_runtime() {
        let source = CommandSource::new("sleep 1; echo late", None);

        let timer = tokio::spawn(async {
            let started = std::time::Instant::now();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            started.elapsed()
        });

        source.prepare(0).await;
        let timer_elapsed = timer.await.unwrap();
        assert!(timer_elapsed < std::time::Duration::from_millis(500), "{:?}", timer_elapsed);
        assert_eq!(source.value_at(0).as_deref(), Some("late"));
    }
}
