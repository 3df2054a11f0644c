use std::sync::{PoisonError, RwLock};

use codeshare_core::exercise::{Exercise, NewExercise};
use uuid::Uuid;

use crate::config::ExerciseSeed;
use crate::coordinator::{SnapshotSink, StarterSource};

/// Longest accepted exercise name.
const MAX_NAME_LEN: usize = 128;

/// Longest accepted starter, solution, or saved code.
const MAX_CODE_LEN: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("exercise not found: {0}")]
    NotFound(String),
    #[error("an exercise named {0:?} already exists")]
    DuplicateName(String),
    #[error("{0}")]
    Invalid(String),
}

/// In-memory exercise catalog. Insertion order is preserved for listing.
pub struct ExerciseStore {
    exercises: RwLock<Vec<Exercise>>,
}

impl Default for ExerciseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExerciseStore {
    pub fn new() -> Self {
        Self {
            exercises: RwLock::new(Vec::new()),
        }
    }

    /// Build a catalog from config seeds, falling back to the built-in set
    /// when none are configured.
    pub fn from_seeds(seeds: &[ExerciseSeed]) -> Self {
        let store = Self::new();
        if seeds.is_empty() {
            for (id, name, initial_code, solution) in BUILTIN_EXERCISES {
                store.insert_seed(id.to_string(), name, initial_code, solution);
            }
        } else {
            for seed in seeds {
                let id = seed.id.clone().unwrap_or_else(|| slugify(&seed.name));
                store.insert_seed(id, &seed.name, &seed.initial_code, &seed.solution);
            }
        }
        store
    }

    fn insert_seed(&self, id: String, name: &str, initial_code: &str, solution: &str) {
        let mut exercises = self.exercises.write().unwrap_or_else(PoisonError::into_inner);
        if exercises.iter().any(|e| e.id == id || e.name == name) {
            tracing::warn!(id = %id, name, "Skipping duplicate exercise seed");
            return;
        }
        exercises.push(Exercise {
            id,
            name: name.to_string(),
            initial_code: initial_code.to_string(),
            solution: solution.to_string(),
            current_code: None,
        });
    }

    pub fn list(&self) -> Vec<Exercise> {
        self.exercises
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Exercise> {
        self.exercises
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.exercises
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a new exercise under a fresh id. Names are unique.
    pub fn create(&self, new: NewExercise) -> Result<Exercise, StoreError> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::Invalid("name must not be empty".to_string()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(StoreError::Invalid(format!(
                "name exceeds {MAX_NAME_LEN} chars"
            )));
        }
        if new.initial_code.len() > MAX_CODE_LEN || new.solution.len() > MAX_CODE_LEN {
            return Err(StoreError::Invalid(format!(
                "code exceeds {MAX_CODE_LEN} bytes"
            )));
        }

        let mut exercises = self.exercises.write().unwrap_or_else(PoisonError::into_inner);
        if exercises.iter().any(|e| e.name == name) {
            return Err(StoreError::DuplicateName(name));
        }
        let exercise = Exercise {
            id: Uuid::new_v4().to_string(),
            name,
            initial_code: new.initial_code,
            solution: new.solution,
            current_code: None,
        };
        exercises.push(exercise.clone());
        tracing::info!(id = %exercise.id, name = %exercise.name, "Exercise created");
        Ok(exercise)
    }

    /// Overwrite the saved code of an exercise.
    pub fn save_current_code(&self, id: &str, code: String) -> Result<Exercise, StoreError> {
        if code.len() > MAX_CODE_LEN {
            return Err(StoreError::Invalid(format!(
                "code exceeds {MAX_CODE_LEN} bytes"
            )));
        }
        let mut exercises = self.exercises.write().unwrap_or_else(PoisonError::into_inner);
        let exercise = exercises
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        exercise.current_code = Some(code);
        Ok(exercise.clone())
    }
}

impl StarterSource for ExerciseStore {
    fn starter_code(&self, room_key: &str) -> Option<String> {
        self.exercises
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.id == room_key)
            .map(|e| e.starter_code().to_string())
    }
}

impl SnapshotSink for ExerciseStore {
    fn persist(&self, room_key: &str, code: &str) {
        match self.save_current_code(room_key, code.to_string()) {
            Ok(_) => tracing::debug!(room = room_key, "Snapshot persisted"),
            // Rooms are not required to map to an exercise
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(room = room_key, "No exercise for room, snapshot not persisted")
            },
            Err(e) => tracing::warn!(room = room_key, error = %e, "Failed to persist snapshot"),
        }
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// (id, name, initial code, solution)
const BUILTIN_EXERCISES: [(&str, &str, &str, &str); 4] = [
    (
        "async-case",
        "Async Case",
        r#"// Write a function that fetches data from an API
// The function should return a promise that resolves with the data
// Use async/await syntax

function fetchData() {
  // Your code here
}"#,
        r#"async function fetchData() {
  try {
    const response = await fetch('https://api.example.com/data');
    const data = await response.json();
    return data;
  } catch (error) {
    throw new Error('Failed to fetch data: ' + error.message);
  }
}"#,
    ),
    (
        "array-manipulation",
        "Array Manipulation",
        r#"// Write a function that takes an array of numbers
// and returns a new array with:
// 1. All numbers doubled
// 2. Only even numbers
// 3. Sum of all numbers

function processArray(numbers) {
  // Your code here
}"#,
        r#"function processArray(numbers) {
  const doubled = numbers.map(num => num * 2);
  const evenOnly = doubled.filter(num => num % 2 === 0);
  const sum = evenOnly.reduce((acc, curr) => acc + curr, 0);

  return {
    doubled,
    evenOnly,
    sum
  };
}"#,
    ),
    (
        "object-handling",
        "Object Handling",
        r#"// Write a function that takes an object and:
// 1. Deep clones the object
// 2. Removes all null/undefined values
// 3. Converts all string values to uppercase

function processObject(obj) {
  // Your code here
}"#,
        r#"function processObject(obj) {
  const cloned = JSON.parse(JSON.stringify(obj));

  const cleaned = Object.fromEntries(
    Object.entries(cloned).filter(([_, value]) => value != null)
  );

  return Object.fromEntries(
    Object.entries(cleaned).map(([key, value]) => [
      key,
      typeof value === 'string' ? value.toUpperCase() : value
    ])
  );
}"#,
    ),
    (
        "string-operations",
        "String Operations",
        r#"// Write a function that:
// 1. Reverses a string
// 2. Removes all vowels
// 3. Counts the frequency of each character

function processString(str) {
  // Your code here
}"#,
        r#"function processString(str) {
  const reversed = str.split('').reverse().join('');
  const noVowels = str.replace(/[aeiou]/gi, '');
  const frequency = str.split('').reduce((acc, char) => {
    acc[char] = (acc[char] || 0) + 1;
    return acc;
  }, {});

  return {
    reversed,
    noVowels,
    frequency
  };
}"#,
    ),
];
