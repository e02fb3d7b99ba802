use crate::cleaner::DeletionProgress;
use crate::scanner::{ScanProgress, VenvEntry};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the interactive session is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Scanning,
    Selecting,
    Confirming,
    Cleaning,
    Done,
}

/// Sort order of the environment list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Most recently modified first
    #[default]
    Time,
    /// Largest first
    Size,
    /// Repository path, ascending
    Path,
}

impl SortMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Time => "last modified",
            Self::Size => "size",
            Self::Path => "path",
        }
    }

    pub fn sort(&self, entries: &mut [VenvEntry]) {
        match self {
            Self::Time => entries.sort_by(|a, b| b.last_modified.cmp(&a.last_modified)),
            Self::Size => entries.sort_by(|a, b| b.size.cmp(&a.size)),
            Self::Path => entries.sort_by(|a, b| a.repo_path.cmp(&b.repo_path)),
        }
    }
}

/// A key press, already stripped of terminal details
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Enter,
    Esc,
    /// Ctrl-C
    Interrupt,
    Char(char),
}

/// Everything the session reacts to
#[derive(Debug)]
pub enum AppEvent {
    EntryFound(VenvEntry),
    ScanProgress(ScanProgress),
    /// Both scan streams have closed
    ScanFinished,
    DeletionProgress(DeletionProgress),
    /// The deletion stream has closed; carries the number of failed removals
    DeletionFinished { failed: usize },
    Key(Key),
}

/// What the driver has to do after an event
#[derive(Debug, PartialEq)]
pub enum Command {
    None,
    Quit,
    /// Run the deletion executor over this list
    StartDeletion(Vec<VenvEntry>),
}

/// State machine behind the interactive session.
///
/// It owns the materialized entry list; producers never touch it.
#[derive(Debug)]
pub struct App {
    pub root: PathBuf,
    pub entries: Vec<VenvEntry>,
    pub cursor: usize,
    pub sort: SortMode,
    pub state: AppState,
    pub scan_progress: ScanProgress,
    pub deletion: Option<DeletionProgress>,
    pub failed: usize,
}

impl App {
    pub fn new(root: PathBuf, sort: SortMode) -> Self {
        Self {
            root,
            entries: Vec::new(),
            cursor: 0,
            sort,
            state: AppState::Scanning,
            scan_progress: ScanProgress::default(),
            deletion: None,
            failed: 0,
        }
    }

    pub fn handle(&mut self, event: AppEvent) -> Command {
        match event {
            AppEvent::EntryFound(entry) => {
                self.entries.push(entry);
                self.sort.sort(&mut self.entries);
            }
            AppEvent::ScanProgress(progress) => self.scan_progress = progress,
            AppEvent::ScanFinished => {
                if self.state == AppState::Scanning {
                    self.state = if self.entries.is_empty() {
                        AppState::Done
                    } else {
                        AppState::Selecting
                    };
                }
            }
            AppEvent::DeletionProgress(progress) => self.deletion = Some(progress),
            AppEvent::DeletionFinished { failed } => {
                self.failed = failed;
                self.state = AppState::Done;
            }
            AppEvent::Key(key) => return self.on_key(key),
        }

        Command::None
    }

    fn on_key(&mut self, key: Key) -> Command {
        match self.state {
            AppState::Scanning => match key {
                Key::Char('q') | Key::Interrupt => return Command::Quit,
                _ => {}
            },
            AppState::Selecting => match key {
                Key::Char('q') | Key::Interrupt => return Command::Quit,
                Key::Up | Key::Char('k') => self.cursor = self.cursor.saturating_sub(1),
                Key::Down | Key::Char('j') => {
                    if self.cursor + 1 < self.entries.len() {
                        self.cursor += 1;
                    }
                }
                Key::Char(' ') => self.toggle_selection(),
                Key::Enter => {
                    if self.selected_count() > 0 {
                        self.state = AppState::Confirming;
                    }
                }
                Key::Char('t') => self.set_sort(SortMode::Time),
                Key::Char('s') => self.set_sort(SortMode::Size),
                Key::Char('n') => self.set_sort(SortMode::Path),
                Key::Char('a') => self.entries.iter_mut().for_each(|e| e.selected = true),
                Key::Char('d') => self.entries.iter_mut().for_each(|e| e.selected = false),
                _ => {}
            },
            AppState::Confirming => match key {
                Key::Char('y') | Key::Char('Y') | Key::Enter => {
                    self.state = AppState::Cleaning;
                    return Command::StartDeletion(self.entries.clone());
                }
                Key::Char('n') | Key::Char('N') | Key::Char('q') | Key::Esc | Key::Interrupt => {
                    self.state = AppState::Selecting;
                }
                _ => {}
            },
            AppState::Cleaning => {}
            AppState::Done => return Command::Quit,
        }

        Command::None
    }

    fn set_sort(&mut self, sort: SortMode) {
        self.sort = sort;
        self.sort.sort(&mut self.entries);
        self.cursor = 0;
    }

    fn toggle_selection(&mut self) {
        if let Some(entry) = self.entries.get_mut(self.cursor) {
            entry.selected = !entry.selected;
        }
    }

    pub fn selected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.selected).count()
    }

    pub fn selected_size(&self) -> u64 {
        self.entries.iter().filter(|e| e.selected).map(|e| e.size).sum()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Number removed and bytes freed, from the last deletion snapshot
    pub fn totals(&self) -> (usize, u64) {
        self.deletion
            .map(|p| (p.removed, p.bytes_freed))
            .unwrap_or((0, 0))
    }
}
