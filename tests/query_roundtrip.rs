//! Parsing a filter or sort and printing it back yields a canonical form that parses to the
//! same expression.

use jsonapi_sdk::query::parsing::{FilterParser, IncludeParser, SortParser};
use jsonapi_sdk::testing;
use proptest::prelude::*;

fn literal() -> impl Strategy<Value = String> {
    "[a-z' ]{1,6}".prop_map(|text| format!("'{}'", text.replace('\'', "''")))
}

fn leaf() -> impl Strategy<Value = String> {
    prop_oneof![
        (prop_oneof![Just("equals"), Just("lessThan"), Just("greaterOrEqual")], literal())
            .prop_map(|(op, lit)| format!("{}(caption,{})", op, lit)),
        (prop_oneof![Just("contains"), Just("startsWith"), Just("endsWith")], literal())
            .prop_map(|(op, lit)| format!("{}(caption,{})", op, lit)),
        Just("equals(author,null)".to_string()),
        Just("has(labels)".to_string()),
        literal().prop_map(|lit| format!("has(comments,equals(text,{}))", lit)),
        literal().prop_map(|lit| format!("equals(author.userName,{})", lit)),
    ]
}

fn filter() -> impl Strategy<Value = String> {
    leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..4).prop_map(|terms| format!("and({})", terms.join(","))),
            prop::collection::vec(inner.clone(), 2..4).prop_map(|terms| format!("or({})", terms.join(","))),
            inner.prop_map(|term| format!("not({})", term)),
        ]
    })
}

/// Includable relationships of the blog graph, with their target types.
fn relationships_of(resource_type: &str) -> &'static [(&'static str, &'static str)] {
    match resource_type {
        "blogPosts" => &[
            ("author", "webAccounts"),
            ("reviewer", "webAccounts"),
            ("labels", "labels"),
            ("comments", "comments"),
            ("parent", "blogs"),
        ],
        "webAccounts" => &[("posts", "blogPosts")],
        "labels" => &[("posts", "blogPosts")],
        "comments" => &[("author", "webAccounts"), ("parent", "blogPosts")],
        "blogs" => &[("posts", "blogPosts"), ("owner", "webAccounts")],
        _ => &[],
    }
}

/// Dotted relationship chain starting at blogPosts.
fn chain() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(any::<prop::sample::Index>(), 1..5).prop_map(|choices| {
        let mut current = "blogPosts";
        let mut names = Vec::new();
        for choice in choices {
            let options = relationships_of(current);
            let (name, target) = options[choice.index(options.len())];
            names.push(name);
            current = target;
        }
        names
    })
}

/// Comma-separated chains, plus repeats of whole chains and of their prefixes.
fn include() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(chain(), 1..4),
        prop::collection::vec((any::<prop::sample::Index>(), any::<prop::sample::Index>()), 0..3),
    )
        .prop_map(|(chains, repeats)| {
            let mut paths: Vec<String> = chains.iter().map(|c| c.join(".")).collect();
            for (which, length) in repeats {
                let chain = &chains[which.index(chains.len())];
                paths.push(chain[..=length.index(chain.len())].join("."));
            }
            paths.join(",")
        })
}

proptest! {
    #[test]
    fn filter_printing_is_idempotent(source in filter()) {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let parser = FilterParser::new(&graph);

        let parsed = parser.parse("filter", &source, &posts).unwrap();
        let printed = parsed.to_string();
        let reparsed = parser.parse("filter", &printed, &posts).unwrap();
        prop_assert_eq!(&parsed, &reparsed);
        prop_assert_eq!(printed, reparsed.to_string());
    }

    #[test]
    fn sort_printing_is_idempotent(
        elements in prop::collection::vec(
            (any::<bool>(), prop_oneof![Just("caption"), Just("count(labels)"), Just("author.userName")]),
            1..4,
        )
    ) {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let source = elements
            .iter()
            .map(|(descending, target)| format!("{}{}", if *descending { "-" } else { "" }, target))
            .collect::<Vec<_>>()
            .join(",");

        let parser = SortParser::new(&graph);
        let parsed = parser.parse("sort", &source, &posts).unwrap();
        prop_assert_eq!(parsed.to_string(), source);
    }

    #[test]
    fn include_printing_is_idempotent(source in include()) {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let parser = IncludeParser::new(&graph, None);

        let parsed = parser.parse("include", &source, &posts).unwrap();
        let printed = parsed.to_string();
        let reparsed = parser.parse("include", &printed, &posts).unwrap();
        prop_assert_eq!(&parsed, &reparsed);
        prop_assert_eq!(&printed, &reparsed.to_string());

        // Repeated chains and prefixes of longer chains are merged away.
        let paths: Vec<&str> = printed.split(',').collect();
        for (i, path) in paths.iter().enumerate() {
            for (j, other) in paths.iter().enumerate() {
                if i != j {
                    prop_assert_ne!(path, other);
                    prop_assert!(!other.starts_with(&format!("{}.", path)), "{} is a prefix of {}", path, other);
                }
            }
        }
    }
}
