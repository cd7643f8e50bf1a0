/*!
Task domain model.

Field names follow the stored JSON (`dueDate`, `createdAt`, ...) so tasks
written by the web front end load unchanged.
*/

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::TaskflowError;

macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = TaskflowError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| {
                        TaskflowError::validation(format!(
                            "unknown {} '{}', expected one of: {}",
                            stringify!($name).to_ascii_lowercase(),
                            s,
                            Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
                        ))
                    })
            }
        }
    };
}

closed_enum!(
    /// Area of life a task belongs to
    Category {
        Work => "work",
        Personal => "personal",
        Shopping => "shopping",
        Health => "health",
        Finance => "finance",
        Other => "other",
    }
);

closed_enum!(
    /// Progress of a task
    Status {
        Todo => "todo",
        InProgress => "in-progress",
        Done => "done",
    }
);

closed_enum!(
    /// How urgent a task is
    Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

impl Default for Category {
    fn default() -> Self {
        Category::Other
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Todo
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// A stored task
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub order: u32,
    /// Records imported without timestamps read as the Unix epoch
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Value>>,
}

impl Task {
    /// Due before `today` and not finished
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status != Status::Done && self.due_date.is_some_and(|due| due < today)
    }
}

/// Input for creating a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub status: Status,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
}

impl NewTask {
    pub fn new<S: Into<String>>(title: S) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

/// Partial update of a task; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    /// `Some(None)` clears the due date
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
    }
}

/// Conjunction of optional criteria over tasks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    /// Case-insensitive substring of title or description
    pub search: Option<String>,
    pub overdue_only: bool,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn search<S: Into<String>>(mut self, text: S) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn overdue_only(mut self) -> Self {
        self.overdue_only = true;
        self
    }

    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        if self.status.is_some_and(|s| s != task.status)
            || self.priority.is_some_and(|p| p != task.priority)
            || self.category.is_some_and(|c| c != task.category)
        {
            return false;
        }
        if self.overdue_only && !task.is_overdue(today) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                task.title.to_lowercase().contains(&needle)
                    || task.description.to_lowercase().contains(&needle)
            }
            _ => true,
        }
    }
}

/// Counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub done: usize,
    pub overdue: usize,
}

/// Entry of the categories collection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}
