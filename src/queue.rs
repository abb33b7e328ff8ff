//! Queue Module
//! Ordered play queue with a cursor and a loop policy

use crate::database::Track;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    NoLoop,
    LoopOne,
    LoopAll,
}

impl LoopMode {
    /// Order used by the loop toggle: no loop, loop one, loop all, and around again
    pub fn cycled(self) -> Self {
        match self {
            LoopMode::NoLoop => LoopMode::LoopOne,
            LoopMode::LoopOne => LoopMode::LoopAll,
            LoopMode::LoopAll => LoopMode::NoLoop,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopMode::NoLoop => "no_loop",
            LoopMode::LoopOne => "loop_one",
            LoopMode::LoopAll => "loop_all",
        };
        f.write_str(name)
    }
}

impl FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "no_loop" | "none" | "off" | "no" => Ok(LoopMode::NoLoop),
            "loop_one" | "one" => Ok(LoopMode::LoopOne),
            "loop_all" | "all" => Ok(LoopMode::LoopAll),
            other => Err(format!("unknown loop mode '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub file_path: String,
    pub thumbnail: String,
}

impl QueueEntry {
    pub fn new(file_path: impl Into<String>, thumbnail: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            thumbnail: thumbnail.into(),
        }
    }
}

impl From<&Track> for QueueEntry {
    fn from(track: &Track) -> Self {
        QueueEntry::new(track.file_path.clone(), track.thumbnail.clone())
    }
}

/// Read-only view of one queue slot for display
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueItem<'a> {
    pub index: usize,
    pub entry: &'a QueueEntry,
    pub is_current: bool,
}

/// The cursor is `None` exactly when the queue is empty, otherwise it indexes `entries`.
#[derive(Debug, Default, Clone)]
pub struct QueueManager {
    entries: Vec<QueueEntry>,
    current: Option<usize>,
    loop_mode: LoopMode,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_songs<I>(&mut self, songs: I)
    where
        I: IntoIterator<Item = QueueEntry>,
    {
        self.entries.extend(songs);
        if self.current.is_none() && !self.entries.is_empty() {
            self.current = Some(0);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn cycle_loop_mode(&mut self) -> LoopMode {
        self.loop_mode = self.loop_mode.cycled();
        self.loop_mode
    }

    /// Cursor position, `None` for an empty queue (the "-1" state)
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.current.and_then(|i| self.entries.get(i))
    }

    pub fn has_next(&self) -> bool {
        let Some(index) = self.current else {
            return false;
        };
        match self.loop_mode {
            LoopMode::LoopOne | LoopMode::LoopAll => true,
            LoopMode::NoLoop => index + 1 < self.entries.len(),
        }
    }

    /// Advance according to the loop mode. `None` means the end of the queue was reached;
    /// the cursor is left where it was.
    pub fn next(&mut self) -> Option<&QueueEntry> {
        let index = self.current?;
        let last = self.entries.len() - 1;

        let target = match self.loop_mode {
            LoopMode::LoopOne => index,
            LoopMode::LoopAll if index >= last => 0,
            _ if index < last => index + 1,
            _ => return None,
        };

        self.current = Some(target);
        self.entries.get(target)
    }

    pub fn has_previous(&self) -> bool {
        let Some(index) = self.current else {
            return false;
        };
        match self.loop_mode {
            LoopMode::LoopOne | LoopMode::LoopAll => true,
            LoopMode::NoLoop => index > 0,
        }
    }

    /// Mirror of [`next`](Self::next): loop one stays put, loop all wraps to the last
    /// entry, no loop stops at the first entry.
    pub fn previous(&mut self) -> Option<&QueueEntry> {
        let index = self.current?;
        let last = self.entries.len() - 1;

        let target = match self.loop_mode {
            LoopMode::LoopOne => index,
            LoopMode::LoopAll if index == 0 => last,
            _ if index > 0 => index - 1,
            _ => return None,
        };

        self.current = Some(target);
        self.entries.get(target)
    }

    /// Move the cursor to `index` if it is in range
    pub fn jump_to(&mut self, index: usize) -> Option<&QueueEntry> {
        if index < self.entries.len() {
            self.current = Some(index);
        }
        self.entries.get(index)
    }

    pub fn all_with_status(&self) -> Vec<QueueItem<'_>> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| QueueItem {
                index,
                entry,
                is_current: Some(index) == self.current,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> QueueEntry {
        QueueEntry::new(format!("/music/{}.mp3", name), format!("/thumbs/{}.jpg", name))
    }

    fn abc(mode: LoopMode) -> QueueManager {
        let mut queue = QueueManager::new();
        queue.add_songs(vec![entry("a"), entry("b"), entry("c")]);
        queue.set_loop_mode(mode);
        queue
    }

    #[test]
    fn empty_queue_has_no_current() {
        let mut queue = QueueManager::new();
        assert!(queue.current().is_none());
        assert_eq!(queue.current_index(), None);
        assert!(!queue.has_next());
        assert!(queue.next().is_none());
        assert!(queue.previous().is_none());

        queue.add_songs(Vec::new());
        assert!(queue.current().is_none());
    }

    #[test]
    fn adding_to_empty_queue_selects_first() {
        let mut queue = QueueManager::new();
        queue.add_songs(vec![entry("a")]);
        assert_eq!(queue.current_index(), Some(0));

        queue.next();
        queue.add_songs(vec![entry("b")]);
        // Appending keeps the cursor
        assert_eq!(queue.current(), Some(&entry("a")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn clear_resets_cursor() {
        let mut queue = abc(LoopMode::LoopAll);
        queue.next();
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.current_index(), None);
        assert!(!queue.has_next());
    }

    #[test]
    fn no_loop_walks_to_the_end() {
        let mut queue = abc(LoopMode::NoLoop);
        assert_eq!(queue.current(), Some(&entry("a")));
        assert!(queue.has_next());

        assert_eq!(queue.next(), Some(&entry("b")));
        assert_eq!(queue.current_index(), Some(1));
        assert_eq!(queue.next(), Some(&entry("c")));
        assert_eq!(queue.current_index(), Some(2));

        assert!(!queue.has_next());
        assert_eq!(queue.next(), None);
        assert_eq!(queue.current_index(), Some(2));
    }

    #[test]
    fn loop_all_wraps_to_start() {
        let mut queue = abc(LoopMode::LoopAll);
        queue.jump_to(2);
        assert!(queue.has_next());
        assert_eq!(queue.next(), Some(&entry("a")));
        assert_eq!(queue.current_index(), Some(0));
    }

    #[test]
    fn loop_one_repeats_current() {
        let mut queue = abc(LoopMode::LoopOne);
        queue.jump_to(1);
        for _ in 0..5 {
            let before = queue.current().cloned();
            assert_eq!(queue.next().cloned(), before);
            assert_eq!(queue.current_index(), Some(1));
        }
    }

    #[test]
    fn previous_is_symmetric_with_next() {
        let mut queue = abc(LoopMode::NoLoop);
        assert!(!queue.has_previous());
        assert_eq!(queue.previous(), None);
        assert_eq!(queue.current_index(), Some(0));

        queue.jump_to(2);
        assert_eq!(queue.previous(), Some(&entry("b")));
        assert_eq!(queue.current_index(), Some(1));

        queue.set_loop_mode(LoopMode::LoopAll);
        queue.jump_to(0);
        assert_eq!(queue.previous(), Some(&entry("c")));
        assert_eq!(queue.current_index(), Some(2));

        queue.set_loop_mode(LoopMode::LoopOne);
        assert_eq!(queue.previous(), Some(&entry("c")));
        assert_eq!(queue.current_index(), Some(2));
    }

    #[test]
    fn status_marks_only_current() {
        let mut queue = abc(LoopMode::NoLoop);
        queue.next();
        let items = queue.all_with_status();
        assert_eq!(items.len(), 3);
        let flags: Vec<bool> = items.iter().map(|i| i.is_current).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(items[2].index, 2);
        assert_eq!(items[2].entry, &entry("c"));
    }

    #[test]
    fn loop_mode_cycles_and_parses() {
        let mut queue = QueueManager::new();
        assert_eq!(queue.cycle_loop_mode(), LoopMode::LoopOne);
        assert_eq!(queue.cycle_loop_mode(), LoopMode::LoopAll);
        assert_eq!(queue.cycle_loop_mode(), LoopMode::NoLoop);

        assert_eq!("all".parse::<LoopMode>(), Ok(LoopMode::LoopAll));
        assert_eq!("loop_one".parse::<LoopMode>(), Ok(LoopMode::LoopOne));
        assert!("sideways".parse::<LoopMode>().is_err());
        assert_eq!(LoopMode::NoLoop.to_string(), "no_loop");
    }

    #[test]
    fn jump_out_of_range_keeps_cursor() {
        let mut queue = abc(LoopMode::NoLoop);
        assert!(queue.jump_to(7).is_none());
        assert_eq!(queue.current_index(), Some(0));
    }
}
