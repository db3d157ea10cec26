//! Characters and other named entities of a plan.

use serde::{Deserialize, Serialize};
use std::fmt;

/// English stop words; entity name parts in this list are never matched
/// literally against outline text.
const STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan", "shan't",
    "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't", "wouldn",
    "wouldn't",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub description: String,
}

impl Entity {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Ordered list of entities, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityList(Vec<Entity>);

impl EntityList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|e| e.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.0.iter().find(|e| e.name == name)
    }

    /// Append an entity. Returns false, leaving the list unchanged, if the name is taken.
    pub fn push(&mut self, entity: Entity) -> bool {
        if self.contains(&entity.name) {
            return false;
        }
        self.0.push(entity);
        true
    }

    /// Numbered list with the `Full Name:` / `Description:` layout used when
    /// asking for the next name.
    pub fn print_with_full_names(&self) -> String {
        self.0
            .iter()
            .enumerate()
            .map(|(i, e)| {
                format!(
                    "{}. Full Name: {}\n\nDescription: {}",
                    i + 1,
                    e.name,
                    e.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Entities literally named in `text`.
    ///
    /// An entity matches when any word of its name appears (case-insensitive)
    /// in the text, unless that word is a stop word or also occurs inside
    /// another entity's name.
    pub fn detect_in(&self, text: &str) -> Vec<String> {
        let text = text.to_lowercase();
        let mut detected = Vec::new();
        for entity in &self.0 {
            let others: String = self
                .0
                .iter()
                .filter(|other| other.name != entity.name)
                .map(|other| other.name.to_lowercase())
                .collect();
            let named = entity.name.split_whitespace().any(|part| {
                let part = part.to_lowercase();
                !others.contains(&part) && text.contains(&part) && !is_stopword(&part)
            });
            if named {
                detected.push(entity.name.clone());
            }
        }
        detected
    }
}

impl FromIterator<Entity> for EntityList {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut list = EntityList::new();
        for entity in iter {
            list.push(entity);
        }
        list
    }
}

impl<'a> IntoIterator for &'a EntityList {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for EntityList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self
            .0
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}. {}: {}", i + 1, e.name, e.description))
            .collect();
        f.write_str(&lines.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cast() -> EntityList {
        [
            Entity::new("Mara Quell", "A cartographer."),
            Entity::new("Tomas Quell", "Her brother."),
            Entity::new("The Archive", "A library under the sea."),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn names_are_unique() {
        let mut list = cast();
        assert!(!list.push(Entity::new("Mara Quell", "Duplicate.")));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn detection_skips_shared_and_stop_words() {
        let list = cast();
        // "quell" is shared by two names, so only first names count.
        assert_eq!(list.detect_in("Quell walks alone."), Vec::<String>::new());
        assert_eq!(list.detect_in("Mara argues with Tomas."), vec!["Mara Quell", "Tomas Quell"]);
        // "the" is a stop word; "archive" is not.
        assert_eq!(list.detect_in("They enter the hall."), Vec::<String>::new());
        assert_eq!(list.detect_in("They flood the archive."), vec!["The Archive"]);
    }

    #[test]
    fn display_formats() {
        let list = cast();
        assert!(list.to_string().starts_with("1. Mara Quell: A cartographer.\n\n2. Tomas Quell"));
        assert!(list
            .print_with_full_names()
            .starts_with("1. Full Name: Mara Quell\n\nDescription: A cartographer."));
    }
}
