use crate::rekognition::Label;
use serde::{Deserialize, Serialize};

/// A single tag in the stored result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub confidence: f64,
}

/// Normalized labeling result persisted per image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    /// File name of the labeled object, also the document id
    pub image_id: String,
    /// Category names in first-seen order, without duplicates
    pub categories: Vec<String>,
    /// One tag per detected label, in detection order
    pub tags: Vec<Tag>,
}

impl ResultDocument {
    /// Build the result document for `image_id` from detected labels.
    ///
    /// Every label becomes a tag; nothing is filtered here since confidence
    /// filtering already happened at detection time.
    pub fn from_labels(image_id: impl Into<String>, labels: &[Label]) -> Self {
        let mut categories: Vec<String> = Vec::new();
        for category in labels.iter().flat_map(|label| label.categories.iter()) {
            if !categories.contains(category) {
                categories.push(category.clone());
            }
        }

        let tags = labels
            .iter()
            .map(|label| Tag {
                name: label.name.clone(),
                confidence: label.confidence,
            })
            .collect();

        Self {
            image_id: image_id.into(),
            categories,
            tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::proptest::prelude::*;
    use std::collections::HashSet;

    fn label(name: &str, confidence: f64, categories: &[&str]) -> Label {
        Label {
            name: name.to_string(),
            confidence,
            categories: categories.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_categories_deduplicated_in_first_seen_order() {
        let labels = vec![
            label("Cat", 98.2, &["Animal", "Pet"]),
            label("Animal", 95.0, &["Animal"]),
            label("Sofa", 70.1, &["Furniture", "Pet"]),
        ];

        let doc = ResultDocument::from_labels("cat.png", &labels);
        assert_eq!(doc.image_id, "cat.png");
        assert_eq!(doc.categories, vec!["Animal", "Pet", "Furniture"]);
    }

    #[test]
    fn test_every_label_becomes_a_tag() {
        let labels = vec![
            label("Person", 99.0, &["People"]),
            label("", 0.0, &[]),
            label("Car", 88.5, &["Vehicle"]),
        ];

        let doc = ResultDocument::from_labels("test.jpg", &labels);
        assert_eq!(doc.tags.len(), labels.len());
        assert_eq!(
            doc.tags[1],
            Tag {
                name: String::new(),
                confidence: 0.0
            }
        );
        assert_eq!(doc.tags[2].name, "Car");
    }

    #[test]
    fn test_empty_labels() {
        let doc = ResultDocument::from_labels("empty.png", &[]);
        assert!(doc.categories.is_empty());
        assert!(doc.tags.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let labels = vec![label("Dog", 91.3, &["Animal"]), label("Ball", 60.0, &["Toy"])];
        assert_eq!(
            ResultDocument::from_labels("dog.jpg", &labels),
            ResultDocument::from_labels("dog.jpg", &labels)
        );
    }

    #[test]
    fn test_serialized_shape() {
        let doc = ResultDocument::from_labels("cat.png", &[label("Cat", 98.5, &["Animal"])]);
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "image_id": "cat.png",
                "categories": ["Animal"],
                "tags": [{"name": "Cat", "confidence": 98.5}]
            })
        );
    }

    // Small pools so generated lists repeat names and categories often
    fn arb_label() -> impl Strategy<Value = Label> {
        let name = prop::sample::select(vec!["", "Cat", "Dog", "Animal", "Sofa"]);
        let confidence = prop_oneof![Just(0.0), Just(100.0), 0.0f64..=100.0];
        let categories = prop::collection::vec(
            prop::sample::select(vec!["", "Animal", "Pet", "Furniture", "Vehicle"]),
            0..4,
        );

        (name, confidence, categories).prop_map(|(name, confidence, categories)| {
            label(name, confidence, &categories)
        })
    }

    proptest! {
        #[test]
        fn prop_one_tag_per_label(labels in prop::collection::vec(arb_label(), 0..16)) {
            let doc = ResultDocument::from_labels("img.png", &labels);

            prop_assert_eq!(doc.tags.len(), labels.len());
            for (tag, label) in doc.tags.iter().zip(&labels) {
                prop_assert_eq!(&tag.name, &label.name);
                prop_assert_eq!(tag.confidence, label.confidence);
            }
        }

        #[test]
        fn prop_categories_unique_in_first_seen_order(labels in prop::collection::vec(arb_label(), 0..16)) {
            let doc = ResultDocument::from_labels("img.png", &labels);

            let unique: HashSet<&String> = doc.categories.iter().collect();
            prop_assert_eq!(unique.len(), doc.categories.len());

            let mut seen = HashSet::new();
            let expected: Vec<String> = labels
                .iter()
                .flat_map(|label| label.categories.clone())
                .filter(|category| seen.insert(category.clone()))
                .collect();
            prop_assert_eq!(doc.categories, expected);
        }

        #[test]
        fn prop_from_labels_is_deterministic(labels in prop::collection::vec(arb_label(), 0..16)) {
            prop_assert_eq!(
                ResultDocument::from_labels("img.png", &labels),
                ResultDocument::from_labels("img.png", &labels)
            );
        }
    }
}
