//! Cursor pagination via the `Link` response header.
//!
//! Shopify returns `Link: <https://…?page_info=abc&limit=250>; rel="next"`
//! while more pages remain. The next URL already carries every filter, so
//! it is requested verbatim.

use newshelf_engine::CatalogError;

/// Extract the `rel="next"` URL from a `Link` header value.
///
/// A next link without a `page_info` cursor cannot be followed safely and
/// is reported as a transient error so that the whole listing restarts.
pub fn next_page_url(link: Option<&str>) -> Result<Option<String>, CatalogError> {
    let Some(link) = link else {
        return Ok(None);
    };

    for part in link.split(',') {
        let mut pieces = part.split(';');
        let Some(target) = pieces.next() else {
            continue;
        };
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == r#"rel="next""# || param == "rel=next"
        });
        if !is_next {
            continue;
        }

        let url = target.trim().trim_start_matches('<').trim_end_matches('>');
        if url.is_empty() || !url.contains("page_info=") {
            return Err(CatalogError::transient(format!(
                "incomplete enumeration: unusable next link {url:?}"
            )));
        }
        return Ok(Some(url.to_string()));
    }

    Ok(None)
}
