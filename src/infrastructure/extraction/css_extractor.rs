//! CSS selector extraction over HTML documents

use scraper::{Html, Selector};
use tracing::debug;

use super::ExtractionError;

/// Selects all matching elements and joins their trimmed text, one per line
#[derive(Debug, Clone)]
pub struct CssExtractor {
    expression: String,
    selector: Selector,
}

impl CssExtractor {
    pub fn new(selector: &str) -> Result<Self, ExtractionError> {
        let parsed = Selector::parse(selector).map_err(|e| ExtractionError::InvalidSelector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expression: selector.to_string(),
            selector: parsed,
        })
    }

    pub fn selector(&self) -> &str {
        &self.expression
    }

    pub fn extract(&self, body: &[u8], _content_type: &str) -> Result<String, ExtractionError> {
        let document = Html::parse_document(&String::from_utf8_lossy(body));

        let mut matched = 0usize;
        let texts: Vec<String> = document
            .select(&self.selector)
            .inspect(|_| matched += 1)
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|text| !text.is_empty())
            .collect();

        debug!(selector = %self.expression, matched, with_text = texts.len(), "CSS selection done");

        if matched == 0 {
            return Err(ExtractionError::NoMatch {
                expression: self.expression.clone(),
            });
        }
        if texts.is_empty() {
            return Err(ExtractionError::EmptyText {
                selector: self.expression.clone(),
            });
        }

        Ok(texts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <h1> Release notes </h1>
          <ul class="versions">
            <li>v1.0</li>
            <li>   </li>
            <li><span>v1.1</span> <em>beta</em></li>
          </ul>
          <p class="empty"></p>
        </body></html>
    "#;

    #[test]
    fn test_joins_matches_in_document_order() {
        let extractor = CssExtractor::new("ul.versions li").unwrap();
        let value = extractor.extract(PAGE.as_bytes(), "text/html").unwrap();
        assert_eq!(value, "v1.0\nv1.1 beta");
    }

    #[test]
    fn test_single_match_is_trimmed() {
        let extractor = CssExtractor::new("h1").unwrap();
        assert_eq!(extractor.extract(PAGE.as_bytes(), "").unwrap(), "Release notes");
    }

    #[test]
    fn test_zero_matches_is_an_error() {
        let extractor = CssExtractor::new("table.prices").unwrap();
        let err = extractor.extract(PAGE.as_bytes(), "text/html").unwrap_err();
        assert!(matches!(err, ExtractionError::NoMatch { .. }));
    }

    #[test]
    fn test_all_empty_matches_is_an_error() {
        let extractor = CssExtractor::new("p.empty").unwrap();
        let err = extractor.extract(PAGE.as_bytes(), "text/html").unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyText { .. }));
    }

    #[test]
    fn test_invalid_selector_fails_construction() {
        assert!(CssExtractor::new(">>>").is_err());
    }
}
