use std::collections::VecDeque;

use crate::entry::EntryId;

/// 選取紀錄，最新者在尾端。 / Bounded selection history, most recent last.
#[derive(Debug, Clone)]
pub struct SelectionHistory {
    capacity: usize,
    entries: VecDeque<EntryId>,
}

impl SelectionHistory {
    /// 建立指定容量的紀錄。 / Creates a history with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 加入或提升至最新。 / Appends `id`, moving it to the end if already present.
    pub fn push(&mut self, id: &EntryId) {
        self.entries.retain(|existing| existing != id);
        self.entries.push_back(id.clone());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// 移除指定項目；若存在則回傳 `true`。 / Removes `id` and returns `true` if it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let initial_len = self.entries.len();
        self.entries.retain(|existing| existing.as_str() != id);
        initial_len != self.entries.len()
    }

    /// Most recent id other than `current` for which `is_live` holds.
    pub fn previous<F>(&self, current: &str, is_live: F) -> Option<EntryId>
    where
        F: Fn(&EntryId) -> bool,
    {
        self.entries
            .iter()
            .rev()
            .find(|id| id.as_str() != current && is_live(id))
            .cloned()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 依時間先後迭代。 / Iterates oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EntryId> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(history: &SelectionHistory) -> Vec<&str> {
        history.iter().map(EntryId::as_str).collect()
    }

    #[test]
    fn previous_skips_current_and_closed() {
        let mut history = SelectionHistory::new(8);
        for id in ["a", "b", "c"] {
            history.push(&EntryId::from(id));
        }
        assert_eq!(history.previous("c", |_| true), Some("b".into()));

        history.remove("b");
        assert_eq!(history.previous("c", |_| true), Some("a".into()));
        assert_eq!(history.previous("c", |id| id.as_str() != "a"), None);
    }

    #[test]
    fn push_promotes_and_limits_capacity() {
        let mut history = SelectionHistory::new(3);
        for id in ["a", "b", "c", "a"] {
            history.push(&EntryId::from(id));
        }
        assert_eq!(ids(&history), vec!["b", "c", "a"]);

        // 超出容量時應移除最舊的紀錄。 / The oldest entry is evicted.
        history.push(&EntryId::from("d"));
        assert_eq!(ids(&history), vec!["c", "a", "d"]);
    }
}
