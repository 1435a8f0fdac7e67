use serde::{Deserialize, Serialize};

/// How a child's index name is derived from its enclosing objects.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// `user.name`
    #[default]
    Full,
    /// `name`
    JustName,
}

impl PathType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathType::Full => "full",
            PathType::JustName => "just_name",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "full" => Some(PathType::Full),
            "just_name" | "justName" => Some(PathType::JustName),
            _ => None,
        }
    }
}

/// The chain of object names leading to the value currently being built or parsed.
///
/// The root object never appears in the path, so a top-level field `age`
/// has the full name `age`, not `<type>.age`.
#[derive(Debug, Clone, Default)]
pub struct ContentPath {
    elements: Vec<String>,
    path_type: PathType,
}

impl ContentPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the path, keeping the allocated capacity.
    pub fn reset(&mut self) {
        self.elements.clear();
        self.path_type = PathType::Full;
    }

    pub fn add(&mut self, name: &str) {
        self.elements.push(name.to_string());
    }

    pub fn remove(&mut self) {
        self.elements.pop();
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    pub fn path_type(&self) -> PathType {
        self.path_type
    }

    pub fn set_path_type(&mut self, path_type: PathType) {
        self.path_type = path_type;
    }

    pub fn full_path_as_text(&self, name: &str) -> String {
        let mut text = String::new();
        for element in &self.elements {
            text.push_str(element);
            text.push('.');
        }
        text.push_str(name);
        text
    }

    /// Index name of `name` under the current path type.
    pub fn path_as_text(&self, name: &str) -> String {
        match self.path_type {
            PathType::JustName => name.to_string(),
            PathType::Full => self.full_path_as_text(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_path_joins_elements() {
        let mut path = ContentPath::new();
        path.add("user");
        path.add("address");
        assert_eq!(path.full_path_as_text("city"), "user.address.city");
        assert_eq!(path.path_as_text("city"), "user.address.city");

        path.set_path_type(PathType::JustName);
        assert_eq!(path.path_as_text("city"), "city");
        assert_eq!(path.full_path_as_text("city"), "user.address.city");

        path.remove();
        path.reset();
        assert!(path.elements().is_empty());
        assert_eq!(path.path_type(), PathType::Full);
    }
}
