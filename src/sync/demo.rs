use chrono::{DateTime, Utc};

use crate::core::list::{NewList, TaskList};
use crate::core::task::{NewTask, Priority, Task, TaskStatus};
use crate::error::RemoteError;
use crate::remote::{RecordKind, RemoteApi, create_record};

struct DemoTask {
    title: &'static str,
    priority: Priority,
    done: bool,
    subtasks: &'static [&'static str],
}

struct DemoList {
    name: &'static str,
    description: &'static str,
    tasks: &'static [DemoTask],
}

const DEMO_LISTS: &[DemoList] = &[
    DemoList {
        name: "Getting Started",
        description: "A few things to try",
        tasks: &[
            DemoTask {
                title: "Add your first task",
                priority: Priority::High,
                done: true,
                subtasks: &[],
            },
            DemoTask {
                title: "Break a task into steps",
                priority: Priority::Medium,
                done: false,
                subtasks: &["Open the task", "Add a subtask", "Tick it off"],
            },
            DemoTask {
                title: "Mark a list as favorite",
                priority: Priority::Low,
                done: false,
                subtasks: &[],
            },
        ],
    },
    DemoList {
        name: "Weekend",
        description: "Errands and plans",
        tasks: &[
            DemoTask {
                title: "Groceries",
                priority: Priority::Medium,
                done: false,
                subtasks: &["Bread", "Coffee", "Apples"],
            },
            DemoTask {
                title: "Call the plumber",
                priority: Priority::High,
                done: false,
                subtasks: &[],
            },
        ],
    },
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemoCounts {
    pub lists: usize,
    pub tasks: usize,
}

/// Create the demo lists and their nested tasks for `owner`.
///
/// Demo lists are placed after `after_sort_order` so they never sort ahead
/// of the owner's own lists. Every record is flagged `isDemo`.
pub async fn populate_demo_data(
    remote: &dyn RemoteApi,
    owner: &str,
    after_sort_order: f64,
    now: DateTime<Utc>,
) -> Result<DemoCounts, RemoteError> {
    let mut counts = DemoCounts::default();

    for (i, demo) in DEMO_LISTS.iter().enumerate() {
        let mut input = NewList::new(demo.name, after_sort_order + 1.0 + i as f64);
        input.description = Some(demo.description.to_string());
        input.is_demo = true;
        let list: TaskList = create_record(remote, RecordKind::List, owner, &input).await?;
        counts.lists += 1;

        for (j, demo_task) in demo.tasks.iter().enumerate() {
            let status = if demo_task.done {
                TaskStatus::Done
            } else {
                TaskStatus::Open
            };
            let mut input =
                NewTask::new(list.id.clone(), demo_task.title, (j + 1) as f64).with_status(status, now);
            input.priority = demo_task.priority;
            input.is_demo = true;
            let parent: Task = create_record(remote, RecordKind::Task, owner, &input).await?;
            counts.tasks += 1;

            for (k, title) in demo_task.subtasks.iter().enumerate() {
                let mut input =
                    NewTask::new(list.id.clone(), *title, (k + 1) as f64).under(parent.id.clone());
                input.is_demo = true;
                let _: Task = create_record(remote, RecordKind::Task, owner, &input).await?;
                counts.tasks += 1;
            }
        }
    }

    log::info!(
        "Created {} demo lists with {} tasks for {}",
        counts.lists,
        counts.tasks,
        owner
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryRemote;
    use crate::sync::index::Indexes;

    fn decode_all<T: serde::de::DeserializeOwned>(remote: &MemoryRemote, kind: RecordKind) -> Vec<T> {
        remote
            .records(kind)
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn creates_flagged_nested_records() {
        let remote = MemoryRemote::new();
        let counts = populate_demo_data(&remote, "user-1", 3.0, Utc::now()).await.unwrap();
        assert_eq!(counts, DemoCounts { lists: 2, tasks: 11 });

        let lists: Vec<TaskList> = decode_all(&remote, RecordKind::List);
        let tasks: Vec<Task> = decode_all(&remote, RecordKind::Task);
        assert_eq!(lists.len(), counts.lists);
        assert_eq!(tasks.len(), counts.tasks);
        assert!(lists.iter().all(|l| l.is_demo && l.owner == "user-1"));
        assert!(lists.iter().all(|l| l.sort_order > 3.0));
        assert!(tasks.iter().all(|t| t.is_demo && t.status_consistent()));

        let indexes = Indexes::build(&lists, &tasks);
        for task in tasks.iter().filter(|t| !t.is_top_level()) {
            let parent = &indexes.tasks_by_id[task.parent_task_id.as_deref().unwrap()];
            assert_eq!(parent.list_id, task.list_id);
        }
    }

    #[tokio::test]
    async fn stops_at_the_first_failed_write() {
        let remote = MemoryRemote::new();
        remote.set_create_failure(RecordKind::Task, Some(RemoteError::Transport("offline".into())));
        let err = populate_demo_data(&remote, "user-1", 0.0, Utc::now()).await.unwrap_err();
        assert_eq!(err, RemoteError::Transport("offline".into()));
        assert_eq!(remote.records(RecordKind::List).len(), 1);
    }
}
