use serde::{Deserialize, Serialize};

/// A coding exercise: the text students start from and the reference
/// solution they are matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: String,
    pub name: String,
    pub initial_code: String,
    pub solution: String,
    /// Last code saved for this exercise, if any.
    #[serde(default)]
    pub current_code: Option<String>,
}

impl Exercise {
    /// Text a student should see when a room for this exercise has no live
    /// snapshot yet.
    pub fn starter_code(&self) -> &str {
        self.current_code.as_deref().unwrap_or(&self.initial_code)
    }
}

/// Body of a create-exercise request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExercise {
    pub name: String,
    pub initial_code: String,
    pub solution: String,
}
