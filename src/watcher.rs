//! Filesystem watcher and task scheduler.
//!
//! One foreground loop consumes events; each eligible event cancels the
//! in-flight task chain and starts a fresh one in a background thread, so
//! at any instant at most one chain produces reportable output.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use colored::Colorize;
use notify::event::{EventKind, RemoveKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use tracing::{debug, error};

use crate::error::Error;
use crate::pipeline::{CancelToken, PipelineContext, Task};

enum Msg {
    Fs(Event),
    FsError(notify::Error),
    Quit,
}

/// Handle for stopping a running [`Watcher`] from another thread.
#[derive(Clone)]
pub struct StopHandle {
    tx: Sender<Msg>,
}

impl StopHandle {
    /// Releases [`Watcher::run`] and cancels the running task chain.
    pub fn stop(&self) {
        let _ = self.tx.send(Msg::Quit);
    }
}

/// Watches the working tree and schedules the task chain.
pub struct Watcher {
    work_dir: PathBuf,
    tasks: std::sync::Arc<Vec<Box<dyn Task>>>,
    delay: Duration,
    exclude_file_prefixes: Vec<String>,
    exclude_dirs: Vec<String>,
    known_dirs: HashSet<PathBuf>,
    tx: Sender<Msg>,
    rx: Receiver<Msg>,
}

impl Watcher {
    pub fn new(
        work_dir: &Path,
        tasks: Vec<Box<dyn Task>>,
        delay_ms: u64,
        exclude_file_prefixes: Vec<String>,
        exclude_dirs: Vec<String>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            work_dir: work_dir.to_path_buf(),
            tasks: std::sync::Arc::new(tasks),
            delay: Duration::from_millis(delay_ms),
            exclude_file_prefixes,
            exclude_dirs,
            known_dirs: HashSet::new(),
            tx,
            rx,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.tx.clone(),
        }
    }

    /// Blocks processing events until [`StopHandle::stop`] is called.
    pub fn run(&mut self) -> Result<()> {
        let tx = self.tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let msg = match res {
                    Ok(event) => Msg::Fs(event),
                    Err(e) => Msg::FsError(e),
                };
                let _ = tx.send(msg);
            },
            notify::Config::default(),
        )
        .context("create filesystem watcher")?;

        self.add_dirs(&mut watcher)?;
        println!("{}", "watcher running...".bold());

        let mut last_mod_file = String::new();
        let mut last_mod_time = Instant::now() - self.delay * 2;
        let mut current_cancel: Option<CancelToken> = None;

        while let Ok(msg) = self.rx.recv() {
            match msg {
                Msg::Quit => {
                    if let Some(cancel) = current_cancel.take() {
                        cancel.cancel();
                    }
                    debug!("watcher quit");
                    return Ok(());
                }
                Msg::FsError(e) => {
                    error!("watch error: {e}");
                }
                Msg::Fs(event) => {
                    let Some(path) = event.paths.first().cloned() else {
                        continue;
                    };
                    if self.track_dirs(&mut watcher, &event, &path) {
                        continue;
                    }
                    if self.skip_change(&event, &path, &last_mod_file, last_mod_time) {
                        continue;
                    }
                    let name = path.to_string_lossy().to_string();
                    println!("{} {}", "File changed:".bold(), name.as_str().cyan());

                    // give the index lock a moment before diffing
                    std::thread::sleep(self.delay / 10);
                    last_mod_file = name.clone();
                    last_mod_time = Instant::now();

                    if let Some(cancel) = current_cancel.take() {
                        cancel.cancel();
                    }
                    let cancel = CancelToken::new();
                    current_cancel = Some(cancel.clone());
                    let ctx = PipelineContext::new(name, cancel);
                    let tasks = self.tasks.clone();
                    std::thread::spawn(move || run_chain(&tasks, ctx));
                }
            }
        }
        Ok(())
    }

    /// Maintains the known-dirs set: removed directories are dropped,
    /// newly created ones registered. True when the event was directory
    /// bookkeeping only.
    fn track_dirs(&mut self, watcher: &mut RecommendedWatcher, event: &Event, path: &Path) -> bool {
        if self.known_dirs.contains(path) {
            if matches!(event.kind, EventKind::Remove(RemoveKind::Folder | RemoveKind::Any)) {
                self.known_dirs.remove(path);
                let _ = watcher.unwatch(path);
                return true;
            }
            return false;
        }
        if path.is_dir() {
            if !self.skip_dir(path) && watcher.watch(path, RecursiveMode::NonRecursive).is_ok() {
                self.known_dirs.insert(path.to_path_buf());
            }
            return true;
        }
        false
    }

    fn skip_change(
        &self,
        event: &Event,
        path: &Path,
        last_mod_file: &str,
        last_mod_time: Instant,
    ) -> bool {
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return true;
        }
        let name = path.to_string_lossy();
        if !name.ends_with(".go") {
            return true;
        }
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for prefix in &self.exclude_file_prefixes {
            if base.starts_with(prefix.as_str()) {
                return true;
            }
        }
        if name == last_mod_file && last_mod_time.elapsed() <= self.delay {
            return true;
        }
        false
    }

    fn skip_dir(&self, dir: &Path) -> bool {
        if dir == self.work_dir {
            // the root is watched even when its basename is hidden
            return false;
        }
        let base = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if base.starts_with('.') {
            return true;
        }
        self.exclude_dirs.iter().any(|d| d == &base)
    }

    /// Registers every directory under the working tree, depth first.
    fn add_dirs(&mut self, watcher: &mut RecommendedWatcher) -> Result<()> {
        let mut stack = vec![self.work_dir.clone()];
        while let Some(dir) = stack.pop() {
            if self.skip_dir(&dir) {
                continue;
            }
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("watch {}", dir.display()))?;
            self.known_dirs.insert(dir.clone());
            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("read {}", dir.display()))?;
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                }
            }
        }
        Ok(())
    }
}

/// Runs the chain, threading each task's output to the next; the first
/// error stops the chain. A superseded (cancelled) run stays silent.
fn run_chain(tasks: &[Box<dyn Task>], ctx: PipelineContext) {
    let mut ctx = ctx;
    for task in tasks {
        debug!("run task {}", task.id());
        match task.run(&ctx) {
            Ok(output) => ctx = ctx.with_output(output),
            Err(e) if Error::is(&e, &Error::TaskCanceled) => {
                debug!("task {} superseded", task.id());
                return;
            }
            Err(e) => {
                error!("stop pipeline, task {} returned {e:#}", task.id());
                return;
            }
        }
        if ctx.cancel.is_canceled() {
            debug!("chain canceled after {}", task.id());
            return;
        }
    }
    debug!("chain finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn watcher_with(delay_ms: u64) -> Watcher {
        Watcher::new(
            Path::new("/tmp/project"),
            Vec::new(),
            delay_ms,
            vec!["flymake".into(), "#flymake".into()],
            vec!["vendor".into(), "node_modules".into()],
        )
    }

    fn write_event(path: &str) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from(path))
    }

    #[test]
    fn test_skip_non_write_ops() {
        let w = watcher_with(500);
        let event = Event::new(EventKind::Access(notify::event::AccessKind::Read))
            .add_path(PathBuf::from("/tmp/project/a.go"));
        let long_ago = Instant::now() - Duration::from_secs(60);
        assert!(w.skip_change(&event, &event.paths[0], "", long_ago));
    }

    #[test]
    fn test_create_of_source_file_is_eligible() {
        let w = watcher_with(500);
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/project/a.go"));
        let long_ago = Instant::now() - Duration::from_secs(60);
        assert!(!w.skip_change(&event, &event.paths[0], "", long_ago));
    }

    #[test]
    fn test_skip_non_go_and_excluded_prefix() {
        let w = watcher_with(500);
        let long_ago = Instant::now() - Duration::from_secs(60);
        let event = write_event("/tmp/project/notes.txt");
        assert!(w.skip_change(&event, &event.paths[0], "", long_ago));
        let event = write_event("/tmp/project/flymake_a.go");
        assert!(w.skip_change(&event, &event.paths[0], "", long_ago));
    }

    #[test]
    fn test_debounce_same_file_within_delay() {
        let w = watcher_with(10_000);
        let event = write_event("/tmp/project/a.go");
        let just_now = Instant::now();
        assert!(w.skip_change(
            &event,
            &event.paths[0],
            "/tmp/project/a.go",
            just_now
        ));
        // another file is not debounced
        let other = write_event("/tmp/project/b.go");
        assert!(!w.skip_change(&other, &other.paths[0], "/tmp/project/a.go", just_now));
    }

    #[test]
    fn test_skip_hidden_and_excluded_dirs_but_not_root() {
        let mut w = watcher_with(500);
        w.work_dir = PathBuf::from("/tmp/.hidden-root");
        assert!(!w.skip_dir(Path::new("/tmp/.hidden-root")));
        assert!(w.skip_dir(Path::new("/tmp/.hidden-root/.git")));
        assert!(w.skip_dir(Path::new("/tmp/.hidden-root/vendor")));
        assert!(!w.skip_dir(Path::new("/tmp/.hidden-root/pkg")));
    }

    #[test]
    fn test_chain_threads_output_and_stops_on_error() {
        use crate::pipeline::FnTask;
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_a = hits.clone();
        let hits_c = hits.clone();
        let tasks: Vec<Box<dyn Task>> = vec![
            Box::new(FnTask::new("a", move |_ctx: &PipelineContext| {
                hits_a.fetch_add(1, Ordering::SeqCst);
                Ok("Tests PASS: TestA$".to_string())
            })),
            Box::new(FnTask::new("b", |ctx: &PipelineContext| {
                assert_eq!(ctx.prev_output, "Tests PASS: TestA$");
                anyhow::bail!("boom")
            })),
            Box::new(FnTask::new("c", move |_ctx: &PipelineContext| {
                hits_c.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            })),
        ];
        let ctx = PipelineContext::new("a.go", CancelToken::new());
        run_chain(&tasks, ctx);
        // task a ran, task c was skipped after b failed
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_canceled_chain_is_silent() {
        use crate::pipeline::FnTask;
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_b = hits.clone();
        let tasks: Vec<Box<dyn Task>> = vec![
            Box::new(FnTask::new("a", |ctx: &PipelineContext| {
                ctx.cancel.cancel();
                Ok(String::new())
            })),
            Box::new(FnTask::new("b", move |_ctx: &PipelineContext| {
                hits_b.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            })),
        ];
        let ctx = PipelineContext::new("a.go", CancelToken::new());
        run_chain(&tasks, ctx);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
