// src/shader_hot_reload.rs
//! Shader hot reload
//! - Watches the directories of loaded pixel shader files
//! - Debounces bursts of change events per file
//! - Hands back the shader handles whose file settled, for the context to reload
//!
//! Usage:
//!  let mut watcher = ShaderWatcher::new(Duration::from_millis(150))?;
//!  watcher.watch(path, handle)?;
//!  // each frame, from the engine thread:
//!  for handle in watcher.poll() { ctx.shader_reload(handle); }

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam::channel::{unbounded, Receiver};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::resource_table::Handle;

pub struct ShaderWatcher {
    watcher: RecommendedWatcher,
    events: Receiver<PathBuf>,
    // file -> shader handles loaded from it
    watched: HashMap<PathBuf, Vec<Handle>>,
    dirs: HashSet<PathBuf>,
    // debounce state
    pending: HashMap<PathBuf, Instant>,
    debounce: Duration,
}

impl ShaderWatcher {
    pub fn new(debounce: Duration) -> Result<Self> {
        let (tx, events) = unbounded::<PathBuf>();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => log::warn!("shader watcher error: {:?}", e),
        })
        .context("creating shader file watcher")?;

        Ok(Self {
            watcher,
            events,
            watched: HashMap::new(),
            dirs: HashSet::new(),
            pending: HashMap::new(),
            debounce,
        })
    }

    /// Start reporting `handle` when `path` changes. The parent directory is
    /// watched so editors that replace the file on save are still seen.
    pub fn watch(&mut self, path: &Path, handle: Handle) -> Result<()> {
        let path = normalize(path);
        if let Some(dir) = path.parent() {
            if !self.dirs.contains(dir) {
                self.watcher
                    .watch(dir, RecursiveMode::NonRecursive)
                    .with_context(|| format!("watching {}", dir.display()))?;
                self.dirs.insert(dir.to_path_buf());
            }
        }
        let handles = self.watched.entry(path).or_default();
        if !handles.contains(&handle) {
            handles.push(handle);
        }
        Ok(())
    }

    pub fn unwatch(&mut self, handle: Handle) {
        self.watched.retain(|_, handles| {
            handles.retain(|&h| h != handle);
            !handles.is_empty()
        });
    }

    pub fn is_watching(&self, handle: Handle) -> bool {
        self.watched.values().any(|handles| handles.contains(&handle))
    }

    /// Drain file events and return the handles whose file has been quiet for the debounce window.
    pub fn poll(&mut self) -> Vec<Handle> {
        let now = Instant::now();
        let changed: Vec<PathBuf> = self.events.try_iter().collect();
        for path in changed {
            self.record(&normalize(&path), now);
        }
        self.due(now)
    }

    fn record(&mut self, path: &Path, at: Instant) {
        if self.watched.contains_key(path) {
            self.pending.insert(path.to_path_buf(), at);
        }
    }

    fn due(&mut self, now: Instant) -> Vec<Handle> {
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, t)| now.duration_since(**t) >= self.debounce)
            .map(|(p, _)| p.clone())
            .collect();

        let mut handles = Vec::new();
        for path in ready {
            self.pending.remove(&path);
            if let Some(hs) = self.watched.get(&path) {
                handles.extend(hs.iter().copied());
            }
        }
        handles.sort_by_key(|h| h.raw());
        handles.dedup();
        handles
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
