//! Link generation for documents, resources and relationships.

use super::objects::{RelationshipLinks, ResourceLinks, TopLevelLinks};
use crate::config::JsonApiOptions;
use crate::query::expressions::PaginationExpression;

const PAGE_NUMBER: &str = "page[number]";

pub struct LinkBuilder<'a> {
    options: &'a JsonApiOptions,
    /// Scheme and authority of the incoming request, e.g. `https://example.com`.
    base_url: Option<&'a str>,
}

impl<'a> LinkBuilder<'a> {
    pub fn new(options: &'a JsonApiOptions, base_url: Option<&'a str>) -> Self {
        LinkBuilder { options, base_url }
    }

    /// Base URL (unless relative links are configured) followed by the namespace.
    fn prefix(&self) -> String {
        let namespace = self.options.namespace.as_deref().unwrap_or("").trim_end_matches('/');
        let namespace = if namespace.is_empty() || namespace.starts_with('/') {
            namespace.to_string()
        } else {
            format!("/{}", namespace)
        };
        match self.base_url.filter(|_| !self.options.use_relative_links) {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), namespace),
            None => namespace,
        }
    }

    pub fn resource(&self, resource_type: &str, id: &str) -> ResourceLinks {
        ResourceLinks {
            self_link: Some(format!("{}/{}/{}", self.prefix(), resource_type, id)),
        }
    }

    pub fn relationship(&self, resource_type: &str, id: &str, relationship: &str) -> RelationshipLinks {
        let prefix = self.prefix();
        RelationshipLinks {
            self_link: Some(format!("{}/{}/{}/relationships/{}", prefix, resource_type, id, relationship)),
            related: Some(format!("{}/{}/{}/{}", prefix, resource_type, id, relationship)),
        }
    }

    /// Links of a top-level document. `path` is relative to the namespace (`/blogs`).
    ///
    /// Pagination links are produced for paged collections. `last` needs the total count;
    /// without it `next` is emitted whenever the page came back full.
    pub fn top_level(
        &self,
        path: &str,
        raw_query: Option<&str>,
        pagination: Option<&PaginationExpression>,
        total: Option<u64>,
        returned: usize,
    ) -> TopLevelLinks {
        let base = format!("{}{}", self.prefix(), path);
        let mut links = TopLevelLinks {
            self_link: Some(with_query(&base, raw_query.unwrap_or(""))),
            ..Default::default()
        };
        let Some(page) = pagination else {
            return links;
        };
        let Some(size) = page.page_size else {
            return links;
        };
        let raw_query = raw_query.unwrap_or("");
        let link_to = |number: u32| with_query(&base, &with_page_number(raw_query, number));

        links.first = Some(link_to(1));
        if page.page_number > 1 {
            links.prev = Some(link_to(page.page_number - 1));
        }
        match total {
            Some(total) => {
                let last = total.div_ceil(u64::from(size)).max(1);
                links.last = Some(link_to(u32::try_from(last).unwrap_or(u32::MAX)));
                if u64::from(page.page_number) < last {
                    links.next = Some(link_to(page.page_number + 1));
                }
            }
            None => {
                if returned >= size as usize {
                    links.next = Some(link_to(page.page_number + 1));
                }
            }
        }
        links
    }
}

fn with_query(base: &str, query: &str) -> String {
    if query.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, query)
    }
}

/// Rewrite the top-level page number of `raw_query`. Scoped numbers (`posts:2`) are kept;
/// page 1 is expressed by omitting the top-level number.
fn with_page_number(raw_query: &str, number: u32) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut scoped: Vec<String> = Vec::new();
    for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
        if key == PAGE_NUMBER {
            scoped.extend(value.split(',').filter(|e| e.contains(':')).map(str::to_string));
        } else {
            serializer.append_pair(&key, &value);
        }
    }
    let mut elements = Vec::new();
    if number > 1 {
        elements.push(number.to_string());
    }
    elements.extend(scoped);
    if !elements.is_empty() {
        serializer.append_pair(PAGE_NUMBER, &elements.join(","));
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(namespace: Option<&str>, relative: bool) -> JsonApiOptions {
        JsonApiOptions {
            namespace: namespace.map(str::to_string),
            use_relative_links: relative,
            ..Default::default()
        }
    }

    #[test]
    fn resource_and_relationship_links_use_namespace() {
        let options = options(Some("api"), false);
        let links = LinkBuilder::new(&options, Some("https://example.com/"));
        assert_eq!(
            links.resource("blogs", "1").self_link.as_deref(),
            Some("https://example.com/api/blogs/1")
        );
        let relationship = links.relationship("blogs", "1", "posts");
        assert_eq!(
            relationship.self_link.as_deref(),
            Some("https://example.com/api/blogs/1/relationships/posts")
        );
        assert_eq!(relationship.related.as_deref(), Some("https://example.com/api/blogs/1/posts"));
    }

    #[test]
    fn relative_links_drop_the_base_url() {
        let options = options(Some("/api/"), true);
        let links = LinkBuilder::new(&options, Some("https://example.com"));
        assert_eq!(links.resource("blogs", "1").self_link.as_deref(), Some("/api/blogs/1"));
    }

    #[test]
    fn pagination_links_with_total() {
        let options = options(None, true);
        let links = LinkBuilder::new(&options, None);
        let page = PaginationExpression::new(2, Some(10));
        let top = links.top_level("/blogs", Some("sort=title&page[number]=2"), Some(&page), Some(25), 10);
        assert_eq!(top.self_link.as_deref(), Some("/blogs?sort=title&page[number]=2"));
        assert_eq!(top.first.as_deref(), Some("/blogs?sort=title"));
        assert_eq!(top.prev.as_deref(), Some("/blogs?sort=title"));
        assert_eq!(top.next.as_deref(), Some("/blogs?sort=title&page%5Bnumber%5D=3"));
        assert_eq!(top.last.as_deref(), Some("/blogs?sort=title&page%5Bnumber%5D=3"));
    }

    #[test]
    fn next_without_total_depends_on_a_full_page() {
        let options = options(None, true);
        let links = LinkBuilder::new(&options, None);
        let page = PaginationExpression::new(1, Some(2));
        let full = links.top_level("/blogs", None, Some(&page), None, 2);
        assert_eq!(full.next.as_deref(), Some("/blogs?page%5Bnumber%5D=2"));
        assert!(full.last.is_none() && full.prev.is_none());
        let partial = links.top_level("/blogs", None, Some(&page), None, 1);
        assert!(partial.next.is_none());
    }

    #[test]
    fn scoped_page_numbers_survive() {
        assert_eq!(
            with_page_number("page[number]=2,posts:3", 1),
            "page%5Bnumber%5D=posts%3A3"
        );
    }
}
