//! Lookup maps derived from the flat list and task collections.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::list::TaskList;
use crate::core::task::Task;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Indexes {
    pub lists_by_id: HashMap<String, TaskList>,
    pub tasks_by_id: HashMap<String, Task>,
    /// Every task of a list, ordered by `sort_order`.
    pub tasks_by_list: HashMap<String, Vec<Task>>,
    /// Direct children of a task, ordered by `sort_order`. Top-level tasks
    /// are not grouped here.
    pub tasks_by_parent: HashMap<String, Vec<Task>>,
}

impl Indexes {
    /// Build all maps. Groups keep arrival order among equal sort orders.
    pub fn build(lists: &[TaskList], tasks: &[Task]) -> Self {
        let lists_by_id = lists
            .iter()
            .map(|l| (l.id.clone(), l.clone()))
            .collect();
        let tasks_by_id = tasks
            .iter()
            .map(|t| (t.id.clone(), t.clone()))
            .collect();

        let mut tasks_by_list: HashMap<String, Vec<Task>> = HashMap::new();
        let mut tasks_by_parent: HashMap<String, Vec<Task>> = HashMap::new();
        for task in tasks {
            tasks_by_list
                .entry(task.list_id.clone())
                .or_default()
                .push(task.clone());
            if let Some(parent) = &task.parent_task_id {
                tasks_by_parent
                    .entry(parent.clone())
                    .or_default()
                    .push(task.clone());
            }
        }

        // sort_by is stable, so ties keep arrival order.
        for group in tasks_by_list.values_mut().chain(tasks_by_parent.values_mut()) {
            group.sort_by(|a, b| a.sort_order.total_cmp(&b.sort_order));
        }

        Self {
            lists_by_id,
            tasks_by_id,
            tasks_by_list,
            tasks_by_parent,
        }
    }

    pub fn tasks_in_list(&self, list_id: &str) -> &[Task] {
        self.tasks_by_list.get(list_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children_of(&self, task_id: &str) -> &[Task] {
        self.tasks_by_parent.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn top_level_tasks<'a>(&'a self, list_id: &str) -> impl Iterator<Item = &'a Task> + use<'a> {
        self.tasks_in_list(list_id).iter().filter(|t| t.is_top_level())
    }

    /// Lists in presentation order: `sort_order`, then id.
    pub fn ordered_lists(&self) -> Vec<&TaskList> {
        let mut lists: Vec<&TaskList> = self.lists_by_id.values().collect();
        lists.sort_by(|a, b| {
            a.sort_order
                .total_cmp(&b.sort_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        lists
    }

    /// Depth-first walk of a list's task tree as `(task, depth)` pairs.
    ///
    /// Tasks whose parent is missing from the list are shown at the top level.
    pub fn flatten_list(&self, list_id: &str) -> Vec<(&Task, usize)> {
        fn collect<'a>(
            idx: &'a Indexes,
            task: &'a Task,
            depth: usize,
            out: &mut Vec<(&'a Task, usize)>,
        ) {
            out.push((task, depth));
            for child in idx.children_of(&task.id) {
                // Parenting across lists is not allowed; skip strays.
                if child.list_id == task.list_id && child.id != task.id {
                    collect(idx, child, depth + 1, out);
                }
            }
        }

        let tasks = self.tasks_in_list(list_id);
        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            let rooted = match &task.parent_task_id {
                None => true,
                Some(parent) => !tasks.iter().any(|t| &t.id == parent),
            };
            if rooted {
                collect(self, task, 0, &mut out);
            }
        }
        out
    }
}

/// Reuses the last build while both inputs are the same allocations.
#[derive(Debug, Default)]
pub struct IndexMemo {
    last: Option<(Arc<Vec<TaskList>>, Arc<Vec<Task>>, Arc<Indexes>)>,
}

impl IndexMemo {
    pub fn get(&mut self, lists: &Arc<Vec<TaskList>>, tasks: &Arc<Vec<Task>>) -> Arc<Indexes> {
        if let Some((l, t, built)) = &self.last {
            if Arc::ptr_eq(l, lists) && Arc::ptr_eq(t, tasks) {
                return built.clone();
            }
        }
        let built = Arc::new(Indexes::build(lists, tasks));
        self.last = Some((lists.clone(), tasks.clone(), built.clone()));
        built
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    pub(crate) fn list(id: &str, sort_order: f64) -> TaskList {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        TaskList {
            id: id.to_string(),
            name: format!("List {}", id),
            description: None,
            is_favorite: false,
            sort_order,
            is_demo: false,
            owner: "user-1".into(),
            created_at: at,
            updated_at: at,
        }
    }

    pub(crate) fn task(id: &str, list_id: &str, parent: Option<&str>, sort_order: f64) -> Task {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        Task {
            id: id.to_string(),
            list_id: list_id.to_string(),
            parent_task_id: parent.map(str::to_string),
            sort_order,
            title: format!("Task {}", id),
            description: None,
            status: Default::default(),
            priority: Default::default(),
            due_at: None,
            completed_at: None,
            assignee_id: None,
            tag_ids: Vec::new(),
            is_demo: false,
            owner: "user-1".into(),
            created_at: at,
            updated_at: at,
        }
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn groups_sorted_by_sort_order() {
        let lists = vec![list("L1", 1.0)];
        let tasks = vec![task("T1", "L1", None, 2.0), task("T2", "L1", None, 1.0)];
        let idx = Indexes::build(&lists, &tasks);
        assert_eq!(ids(idx.tasks_in_list("L1")), vec!["T2", "T1"]);
        assert!(idx.tasks_by_parent.is_empty());
        assert_eq!(idx.lists_by_id["L1"].sort_order, 1.0);
    }

    #[test]
    fn ties_keep_arrival_order() {
        let tasks = vec![
            task("c", "L1", None, 1.0),
            task("a", "L1", None, 1.0),
            task("b", "L1", None, 0.5),
            task("d", "L1", None, 1.0),
        ];
        let idx = Indexes::build(&[], &tasks);
        assert_eq!(ids(idx.tasks_in_list("L1")), vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn children_grouped_under_parent() {
        let tasks = vec![
            task("P", "L1", None, 1.0),
            task("C2", "L1", Some("P"), 2.0),
            task("C1", "L1", Some("P"), 1.0),
        ];
        let idx = Indexes::build(&[], &tasks);
        assert_eq!(ids(idx.children_of("P")), vec!["C1", "C2"]);
        assert!(idx.children_of("C1").is_empty());
        assert_eq!(idx.top_level_tasks("L1").count(), 1);
    }

    #[test]
    fn rebuild_is_deterministic() {
        let lists = vec![list("L2", 2.0), list("L1", 1.0)];
        let tasks = vec![
            task("T1", "L1", None, 3.0),
            task("T2", "L2", None, 1.0),
            task("T3", "L1", Some("T1"), 1.0),
            task("T4", "L1", Some("T1"), 1.0),
        ];
        assert_eq!(Indexes::build(&lists, &tasks), Indexes::build(&lists, &tasks));
    }

    #[test]
    fn lists_ordered_with_id_tiebreak() {
        let lists = vec![list("b", 1.0), list("c", 0.0), list("a", 1.0)];
        let idx = Indexes::build(&lists, &[]);
        let order: Vec<&str> = idx.ordered_lists().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn flatten_walks_depth_first() {
        let tasks = vec![
            task("R2", "L1", None, 2.0),
            task("R1", "L1", None, 1.0),
            task("A", "L1", Some("R1"), 1.0),
            task("A1", "L1", Some("A"), 1.0),
            task("B", "L1", Some("R1"), 2.0),
            task("orphan", "L1", Some("gone"), 3.0),
        ];
        let idx = Indexes::build(&[], &tasks);
        let walk: Vec<(&str, usize)> = idx
            .flatten_list("L1")
            .into_iter()
            .map(|(t, d)| (t.id.as_str(), d))
            .collect();
        assert_eq!(
            walk,
            vec![("R1", 0), ("A", 1), ("A1", 2), ("B", 1), ("R2", 0), ("orphan", 0)]
        );
    }

    #[test]
    fn memo_reuses_build_for_same_inputs() {
        let lists = Arc::new(vec![list("L1", 1.0)]);
        let tasks = Arc::new(vec![task("T1", "L1", None, 1.0)]);
        let mut memo = IndexMemo::default();
        let first = memo.get(&lists, &tasks);
        let second = memo.get(&lists, &tasks);
        assert!(Arc::ptr_eq(&first, &second));

        let copied = Arc::new((*tasks).clone());
        let third = memo.get(&lists, &copied);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }
}
