//! Built-in concept sections. Their plotters live outside this crate.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concept {
    pub name: &'static str,
    pub used_in: &'static str,
}

pub const CONCEPTS: &[Concept] = &[
    Concept {
        name: "Central Limit Theorem",
        used_in: "A/B testing, polling, and startup metrics",
    },
    Concept {
        name: "Law of Large Numbers",
        used_in: "why more data leads to stable ML results",
    },
    Concept {
        name: "Principal Component Analysis",
        used_in: "reducing dimensions by projecting onto directions of maximum variance",
    },
    Concept {
        name: "Minimum Mean Square Error",
        used_in: "cleaning noisy data in signals, finance, and ML regression",
    },
    Concept {
        name: "Polynomial Regression",
        used_in: "finance, weather forecasting, and data trend analysis",
    },
    Concept {
        name: "Bayes' Theorem",
        used_in: "spam filters, medical diagnosis, and probabilistic AI models",
    },
    Concept {
        name: "Gradient Descent",
        used_in: "how models minimize error and improve accuracy over time",
    },
    Concept {
        name: "Logistic Regression",
        used_in: "binary classification with sigmoid or alternative activations",
    },
    Concept {
        name: "Lasso & Ridge Regression",
        used_in: "feature selection (L1) and reducing overfitting (L2)",
    },
    Concept {
        name: "Gaussian Naive Bayes",
        used_in: "fast probabilistic classifiers with per-feature Gaussians",
    },
    Concept {
        name: "Other",
        used_in: "anything else: describe it and the code is generated for you",
    },
];

/// Case-insensitive lookup, ignoring apostrophe style.
pub fn find(name: &str) -> Option<&'static Concept> {
    let norm = |s: &str| s.trim().to_lowercase().replace('’', "'");
    let want = norm(name);
    CONCEPTS.iter().find(|c| norm(c.name) == want)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ends_with_other() {
        assert_eq!(CONCEPTS.len(), 11);
        assert_eq!(CONCEPTS.last().map(|c| c.name), Some("Other"));
    }

    #[test]
    fn lookup_is_forgiving() {
        assert_eq!(find("bayes’ theorem").map(|c| c.name), Some("Bayes' Theorem"));
        assert_eq!(find("  gradient descent ").map(|c| c.name), Some("Gradient Descent"));
        assert!(find("quantum tunnelling").is_none());
    }
}
