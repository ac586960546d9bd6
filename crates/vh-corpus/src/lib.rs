#![forbid(unsafe_code)]

//! Deterministic adversarial corpus for the fuzz-safety gate.
//!
//! A corpus is a pure function of its [`CorpusConfig`]: base cases are kept as-is,
//! every mutation rule is applied to the *original* base text (rules never chain),
//! mutations that leave the text unchanged are pruned, and the result is ordered
//! by case id. Nothing here reads the environment or the clock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DETERMINISTIC_ORDERING: &str = "case_id-lexicographic";
pub const MALFORMED_CORPUS_STRATEGY_ID: &str = "objc3c-malformed-corpus-v1";
const MUTATION_ID_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusCase {
    pub case_id: String,
    pub subsystem: String,
    pub source: String,
}

impl CorpusCase {
    pub fn new(
        case_id: impl Into<String>,
        subsystem: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            subsystem: subsystem.into(),
            source: source.into(),
        }
    }
}

/// A named, pure text transform.
#[derive(Debug, Clone, Copy)]
pub struct MutationRule {
    pub name: &'static str,
    pub transform: fn(&str) -> String,
}

impl MutationRule {
    #[must_use]
    pub const fn new(name: &'static str, transform: fn(&str) -> String) -> Self {
        Self { name, transform }
    }

    #[must_use]
    pub fn apply(&self, source: &str) -> String {
        (self.transform)(source)
    }
}

/// Report block describing how a corpus was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStrategy {
    pub strategy_id: String,
    pub base_case_count: usize,
    pub mutation_rules: Vec<String>,
    pub deterministic_ordering: String,
}

#[derive(Debug, Clone)]
pub struct CorpusConfig {
    pub strategy_id: String,
    pub base_cases: Vec<CorpusCase>,
    pub mutation_rules: Vec<MutationRule>,
    pub max_cases: Option<usize>,
}

impl CorpusConfig {
    pub fn new(
        strategy_id: impl Into<String>,
        base_cases: Vec<CorpusCase>,
        mutation_rules: Vec<MutationRule>,
    ) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            base_cases,
            mutation_rules,
            max_cases: None,
        }
    }

    /// The stock parser/semantic malformed-source corpus.
    #[must_use]
    pub fn malformed_objc3() -> Self {
        Self::new(
            MALFORMED_CORPUS_STRATEGY_ID,
            malformed_objc3_base_cases(),
            vec![
                MutationRule::new("drop_last_char", mutate_drop_last_char),
                MutationRule::new("append_garbage_tail", mutate_append_garbage_tail),
            ],
        )
    }

    #[must_use]
    pub fn with_max_cases(mut self, max_cases: Option<usize>) -> Self {
        self.max_cases = max_cases;
        self
    }

    #[must_use]
    pub fn strategy(&self) -> CorpusStrategy {
        CorpusStrategy {
            strategy_id: self.strategy_id.clone(),
            base_case_count: self.base_cases.len(),
            mutation_rules: self
                .mutation_rules
                .iter()
                .map(|rule| rule.name.to_string())
                .collect(),
            deterministic_ordering: DETERMINISTIC_ORDERING.to_string(),
        }
    }

    #[must_use]
    pub fn build(&self) -> Vec<CorpusCase> {
        build_corpus(self)
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self::malformed_objc3()
    }
}

#[must_use]
pub fn mutated_case_id(base_id: &str, rule_name: &str) -> String {
    format!("{base_id}{MUTATION_ID_SEPARATOR}{rule_name}")
}

#[must_use]
pub fn build_corpus(config: &CorpusConfig) -> Vec<CorpusCase> {
    let mut cases = BTreeMap::new();
    for base in &config.base_cases {
        cases.insert(base.case_id.clone(), base.clone());
        for rule in &config.mutation_rules {
            let mutated = rule.apply(&base.source);
            if mutated == base.source {
                continue;
            }
            let case_id = mutated_case_id(&base.case_id, rule.name);
            cases.insert(
                case_id.clone(),
                CorpusCase {
                    case_id,
                    subsystem: base.subsystem.clone(),
                    source: mutated,
                },
            );
        }
    }

    let ordered = cases.into_values();
    match config.max_cases {
        Some(limit) => ordered.take(limit).collect(),
        None => ordered.collect(),
    }
}

#[must_use]
pub fn mutate_drop_last_char(source: &str) -> String {
    let mut out = source.to_string();
    out.pop();
    out
}

#[must_use]
pub fn mutate_append_garbage_tail(source: &str) -> String {
    format!("{source}\n@@@ fuzz_token ?? !!\n")
}

fn malformed_objc3_base_cases() -> Vec<CorpusCase> {
    vec![
        CorpusCase::new(
            "parser_missing_rbrace",
            "parser",
            "module FuzzParserMissingRBrace;\nfn main() -> int {\n  return 1;\n",
        ),
        CorpusCase::new(
            "parser_missing_semicolon",
            "parser",
            "module FuzzParserMissingSemicolon;\nfn main() -> int {\n  return 1\n}\n",
        ),
        CorpusCase::new(
            "parser_unterminated_message_send",
            "parser",
            "module FuzzParserUnterminatedMessage;\nfn main() -> int {\n  return [obj value:\n}\n",
        ),
        CorpusCase::new(
            "parser_missing_while_rparen",
            "parser",
            "module FuzzParserMissingWhileRParen;\nfn main() -> int {\n  while (true {\n    return 0;\n  }\n}\n",
        ),
        CorpusCase::new(
            "sema_duplicate_symbol",
            "semantic",
            "module FuzzSemaDuplicateSymbol;\nfn value() -> int { return 1; }\nfn value() -> int { return 2; }\nfn main() -> int { return value(); }\n",
        ),
        CorpusCase::new(
            "sema_undefined_reference",
            "semantic",
            "module FuzzSemaUndefinedReference;\nfn main() -> int {\n  return unknown_symbol;\n}\n",
        ),
        CorpusCase::new(
            "sema_invalid_message_receiver",
            "semantic",
            "module FuzzSemaInvalidMessageReceiver;\nfn main() -> int {\n  return [42 length];\n}\n",
        ),
        CorpusCase::new(
            "sema_bad_return_contract",
            "semantic",
            "module FuzzSemaBadReturnContract;\nfn main() -> int {\n  return;\n}\n",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::{
        CorpusCase, CorpusConfig, MutationRule, build_corpus, mutate_append_garbage_tail,
        mutate_drop_last_char,
    };

    fn identity(source: &str) -> String {
        source.to_string()
    }

    fn uppercase(source: &str) -> String {
        source.to_uppercase()
    }

    #[test]
    fn stock_corpus_is_stable_and_sorted() {
        let first = CorpusConfig::malformed_objc3().build();
        let second = CorpusConfig::malformed_objc3().build();
        assert_eq!(first, second);
        assert_eq!(first.len(), 24);

        let ids = first.iter().map(|case| case.case_id.as_str()).collect::<Vec<_>>();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted);

        assert!(first.iter().any(|case| case.subsystem == "parser"));
        assert!(first.iter().any(|case| case.subsystem == "semantic"));
        assert!(first.iter().all(|case| !case.source.trim().is_empty()));
    }

    #[test]
    fn stock_corpus_serializes_identically_across_builds() {
        let first = serde_json::to_string(&CorpusConfig::malformed_objc3().build()).expect("json");
        let second = serde_json::to_string(&CorpusConfig::malformed_objc3().build()).expect("json");
        assert_eq!(first, second);
    }

    #[test]
    fn mutations_apply_to_original_text_not_chained() {
        let config = CorpusConfig::new(
            "test",
            vec![CorpusCase::new("base", "parser", "abc")],
            vec![
                MutationRule::new("drop_last_char", mutate_drop_last_char),
                MutationRule::new("upper", uppercase),
            ],
        );
        let corpus = build_corpus(&config);
        let ids = corpus.iter().map(|case| case.case_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["base", "base__drop_last_char", "base__upper"]);
        assert_eq!(corpus[1].source, "ab");
        assert_eq!(corpus[2].source, "ABC");
        assert_eq!(corpus[2].subsystem, "parser");
    }

    #[test]
    fn idempotent_mutation_is_pruned() {
        let config = CorpusConfig::new(
            "test",
            vec![
                CorpusCase::new("upper_already", "parser", "ABC"),
                CorpusCase::new("lower", "semantic", "abc"),
            ],
            vec![
                MutationRule::new("identity", identity),
                MutationRule::new("upper", uppercase),
            ],
        );
        let ids = build_corpus(&config)
            .into_iter()
            .map(|case| case.case_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["lower", "lower__upper", "upper_already"]);
    }

    #[test]
    fn empty_source_drop_is_pruned() {
        let config = CorpusConfig::new(
            "test",
            vec![CorpusCase::new("empty", "parser", "")],
            vec![MutationRule::new("drop_last_char", mutate_drop_last_char)],
        );
        assert_eq!(build_corpus(&config).len(), 1);
    }

    #[test]
    fn cap_keeps_sorted_prefix() {
        let full = CorpusConfig::malformed_objc3().build();
        let capped = CorpusConfig::malformed_objc3()
            .with_max_cases(Some(5))
            .build();
        assert_eq!(capped.as_slice(), &full[..5]);

        let oversized = CorpusConfig::malformed_objc3()
            .with_max_cases(Some(1000))
            .build();
        assert_eq!(oversized, full);
    }

    #[test]
    fn strategy_block_lists_rules_in_config_order() {
        let strategy = CorpusConfig::malformed_objc3().strategy();
        assert_eq!(strategy.strategy_id, "objc3c-malformed-corpus-v1");
        assert_eq!(strategy.base_case_count, 8);
        assert_eq!(
            strategy.mutation_rules,
            vec!["drop_last_char".to_string(), "append_garbage_tail".to_string()]
        );
        assert_eq!(strategy.deterministic_ordering, "case_id-lexicographic");
    }

    #[test]
    fn garbage_tail_always_changes_text() {
        assert_ne!(mutate_append_garbage_tail(""), "");
        assert!(mutate_append_garbage_tail("x").starts_with('x'));
    }

    #[test]
    fn independent_configs_do_not_interfere() {
        let custom = CorpusConfig::new(
            "custom",
            vec![CorpusCase::new("only", "parser", "x")],
            Vec::new(),
        );
        let stock = CorpusConfig::malformed_objc3();
        assert_eq!(custom.build().len(), 1);
        assert_eq!(stock.build().len(), 24);
    }
}
