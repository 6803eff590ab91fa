//! Recipe details produced by the AI recipe generator.

use serde::{Deserialize, Serialize};

/// One ingredient line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    /// Ingredient name.
    pub name: String,
    /// Free-form quantity ("200 g", "1 tbsp").
    #[serde(default)]
    pub quantity: String,
}

/// Per-serving nutrition estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrition {
    /// Energy in kcal.
    #[serde(default)]
    pub calories: f64,
    /// Protein grams.
    #[serde(default)]
    pub protein_g: f64,
    /// Carbohydrate grams.
    #[serde(default)]
    pub carbs_g: f64,
    /// Fat grams.
    #[serde(default)]
    pub fat_g: f64,
}

/// Structured recipe returned to the client and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDetails {
    /// Recipe title.
    pub title: String,
    /// Number of servings the quantities are for.
    pub servings: u32,
    /// Ingredient list.
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    /// Ordered preparation steps.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Nutrition per serving.
    #[serde(default)]
    pub nutrition: Nutrition,
}

/// Cache key for a recipe request.
///
/// Case and inner whitespace of the name and notes do not matter. The fields
/// are JSON-encoded, so separators inside them cannot collide.
#[must_use]
pub fn recipe_cache_key(recipe_name: &str, servings: u32, dietary_notes: Option<&str>) -> String {
    let normalize = |s: &str| {
        s.split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    };
    let fields = serde_json::json!([
        normalize(recipe_name),
        servings,
        dietary_notes.map(normalize),
    ]);
    format!("recipe:v2:{fields}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_ignores_case_and_spacing() {
        assert_eq!(
            recipe_cache_key("  Chicken   Curry ", 2, None),
            recipe_cache_key("chicken curry", 2, None)
        );
        assert_ne!(
            recipe_cache_key("chicken curry", 2, None),
            recipe_cache_key("chicken curry", 4, None)
        );
        assert_ne!(
            recipe_cache_key("chicken curry", 2, Some("vegan")),
            recipe_cache_key("chicken curry", 2, None)
        );
    }

    #[test]
    fn cache_key_fields_do_not_bleed_into_each_other() {
        assert_ne!(
            recipe_cache_key("a:2", 3, Some("x")),
            recipe_cache_key("a", 2, Some("3:x"))
        );
        assert_ne!(
            recipe_cache_key("soup", 2, Some("")),
            recipe_cache_key("soup", 2, None)
        );
    }

    #[test]
    fn details_tolerate_missing_optional_fields() {
        let details: RecipeDetails =
            serde_json::from_str(r#"{"title":"Oats","servings":1}"#).unwrap();
        assert!(details.ingredients.is_empty());
        assert_eq!(details.nutrition, Nutrition::default());
    }
}
