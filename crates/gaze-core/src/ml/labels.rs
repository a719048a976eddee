//! The closed object-label set and its alias map, carried as data.

/// Canonical detectable categories, in model output order.
pub const CATEGORIES: &[&str] = &[
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Synonyms → canonical category. A `None` target marks a word that looks
/// like an object term but is too generic to use.
pub const ALIASES: &[(&str, Option<&str>)] = &[
    ("cars", Some("car")),
    ("auto", Some("car")),
    ("automobile", Some("car")),
    ("vehicle", Some("car")),
    ("vehicles", Some("car")),
    ("bikes", Some("bicycle")),
    ("bike", Some("bicycle")),
    ("cycle", Some("bicycle")),
    ("motorbike", Some("motorcycle")),
    ("plane", Some("airplane")),
    ("planes", Some("airplane")),
    ("buses", Some("bus")),
    ("trains", Some("train")),
    ("trucks", Some("truck")),
    ("boats", Some("boat")),
    ("people", Some("person")),
    ("human", Some("person")),
    ("humans", Some("person")),
    ("man", Some("person")),
    ("woman", Some("person")),
    ("men", Some("person")),
    ("women", Some("person")),
    ("child", Some("person")),
    ("children", Some("person")),
    ("kid", Some("person")),
    ("kids", Some("person")),
    ("dogs", Some("dog")),
    ("puppy", Some("dog")),
    ("puppies", Some("dog")),
    ("cats", Some("cat")),
    ("kitten", Some("cat")),
    ("kittens", Some("cat")),
    ("birds", Some("bird")),
    ("horses", Some("horse")),
    ("cows", Some("cow")),
    ("elephants", Some("elephant")),
    ("bears", Some("bear")),
    ("zebras", Some("zebra")),
    ("giraffes", Some("giraffe")),
    ("phone", Some("cell phone")),
    ("cellphone", Some("cell phone")),
    ("mobile", Some("cell phone")),
    ("television", Some("tv")),
    ("monitor", Some("tv")),
    ("screen", Some("tv")),
    ("sofa", Some("couch")),
    ("settee", Some("couch")),
    ("computer", Some("laptop")),
    ("notebook", Some("laptop")),
    ("food", None), // too generic
];

/// Resolve a query to a canonical category: whole-query match first, then
/// alias, then word-by-word.
pub fn canonical_category(query: &str) -> Option<&'static str> {
    let lowered = query.to_lowercase();
    let trimmed = lowered.trim();

    if let Some(hit) = CATEGORIES.iter().find(|c| **c == trimmed) {
        return Some(hit);
    }
    if let Some((_, target)) = ALIASES.iter().find(|(alias, _)| *alias == trimmed) {
        return *target;
    }

    for word in trimmed.split_whitespace() {
        if let Some(hit) = CATEGORIES.iter().find(|c| **c == word) {
            return Some(hit);
        }
        if let Some((_, Some(target))) = ALIASES.iter().find(|(alias, _)| *alias == word) {
            return Some(target);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_count() {
        assert_eq!(CATEGORIES.len(), 80);
    }

    #[test]
    fn test_direct_match() {
        assert_eq!(canonical_category("car"), Some("car"));
        assert_eq!(canonical_category("traffic light"), Some("traffic light"));
    }

    #[test]
    fn test_alias_match() {
        assert_eq!(canonical_category("puppy"), Some("dog"));
        assert_eq!(canonical_category("cars"), Some("car"));
    }

    #[test]
    fn test_word_in_query() {
        assert_eq!(canonical_category("red car"), Some("car"));
        assert_eq!(canonical_category("a man at the beach"), Some("person"));
    }

    #[test]
    fn test_generic_alias_is_none() {
        assert_eq!(canonical_category("food"), None);
    }

    #[test]
    fn test_no_match() {
        assert_eq!(canonical_category("sunset over mountains"), None);
    }
}
