use serde::{ Serialize, Deserialize };

/// User supplied attributes attached to outgoing messages.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionProfile {
    pub age: Option<u32>,
    /// Centimetres.
    pub height: Option<f64>,
    /// Kilograms.
    pub weight: Option<f64>,
    pub goal: Option<String>,
    pub activity: Option<String>,
    pub medical_notes: Option<String>,
}

fn filled(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl SessionProfile {
    pub fn has_data(&self) -> bool {
        !self.summary_parts().is_empty()
    }

    /// Populated fields rendered as `label: value`, in a fixed order.
    pub fn summary_parts(&self) -> Vec<String> {
        let mut parts = Vec::new();
        if let Some(age) = self.age {
            parts.push(format!("age: {} años", age));
        }
        if let Some(height) = self.height {
            parts.push(format!("height: {} cm", height));
        }
        if let Some(weight) = self.weight {
            parts.push(format!("weight: {} kg", weight));
        }
        if let Some(goal) = filled(&self.goal) {
            parts.push(format!("goal: {}", goal));
        }
        if let Some(activity) = filled(&self.activity) {
            parts.push(format!("activity: {}", activity));
        }
        if let Some(notes) = filled(&self.medical_notes) {
            parts.push(format!("medical notes: {}", notes));
        }
        parts
    }
}
