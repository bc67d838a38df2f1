use super::error::FilterError;
use super::parser::is_reserved;
use super::types::{is_valid_field_name, OrderTerm, PageRequest, SortDirection, MAX_OFFSET};

/// Raw query pairs split into filter, ordering and paging concerns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub filter: Vec<(String, String)>,
    pub order: Vec<OrderTerm>,
    pub page: PageRequest,
}

/// Splits query pairs. `page`/`per_page` are converted to offset/limit;
/// explicit `limit`/`offset` win over them.
pub fn split(pairs: Vec<(String, String)>) -> Result<ListParams, FilterError> {
    let mut params = ListParams::default();
    let mut page: Option<u64> = None;
    let mut per_page: Option<u32> = None;

    for (key, value) in pairs {
        if !is_reserved(&key) {
            params.filter.push((key, value));
            continue;
        }
        match key.as_str() {
            "limit" => params.page.limit = Some(u32::try_from(number::<u64>(&key, &value)?).unwrap_or(u32::MAX)),
            "offset" => params.page.offset = Some(bounded_offset(&key, number(&key, &value)?)?),
            "cursor" => params.page.cursor = Some(value),
            "page" => {
                let n: u64 = number(&key, &value)?;
                if n == 0 {
                    return Err(FilterError::syntax("page", "pages start at 1"));
                }
                page = Some(n);
            }
            "per_page" => per_page = Some(number(&key, &value)?),
            _ => params.order.extend(order_terms(&key, &value)?),
        }
    }

    if params.page.limit.is_none() {
        params.page.limit = per_page;
    }
    if let (None, Some(page)) = (params.page.offset, page) {
        let size = u64::from(params.page.limit.unwrap_or(0));
        if size == 0 {
            return Err(FilterError::syntax("page", "page requires per_page or limit"));
        }
        params.page.offset = Some(bounded_offset("page", (page - 1).saturating_mul(size))?);
    }

    Ok(params)
}

/// Rejects offsets past [`MAX_OFFSET`] as client errors.
pub fn bounded_offset(key: &str, offset: u64) -> Result<u64, FilterError> {
    if offset > MAX_OFFSET {
        return Err(FilterError::syntax(key, format!("offset may not exceed {}", MAX_OFFSET)));
    }
    Ok(offset)
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, FilterError> {
    value
        .trim()
        .parse()
        .map_err(|_| FilterError::syntax(key, format!("'{}' is not a non-negative integer", value)))
}

/// Parses `a,-b,c__desc,d asc` into order terms.
pub fn order_terms(key: &str, value: &str) -> Result<Vec<OrderTerm>, FilterError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| order_term(key, term))
        .collect()
}

fn order_term(key: &str, term: &str) -> Result<OrderTerm, FilterError> {
    let (field, direction) = if let Some(field) = term.strip_prefix('-') {
        (field, SortDirection::Desc)
    } else if let Some((field, dir)) = term.split_once("__") {
        (field, direction(key, dir)?)
    } else if let Some((field, dir)) = term.split_once(char::is_whitespace) {
        (field, direction(key, dir.trim())?)
    } else {
        (term, SortDirection::Asc)
    };

    if !is_valid_field_name(field) {
        return Err(FilterError::syntax(key, format!("invalid order field '{}'", field)));
    }
    Ok(OrderTerm {
        field: field.to_string(),
        direction,
    })
}

fn direction(key: &str, raw: &str) -> Result<SortDirection, FilterError> {
    match raw.to_ascii_lowercase().as_str() {
        "asc" => Ok(SortDirection::Asc),
        "desc" => Ok(SortDirection::Desc),
        _ => Err(FilterError::syntax(key, format!("unknown sort direction '{}'", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(query: &[(&str, &str)]) -> Vec<(String, String)> {
        query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn separates_filter_from_paging() {
        let params = split(pairs(&[
            ("name", "edge"),
            ("limit", "10"),
            ("offset", "20"),
            ("priority__gt", "3"),
            ("cursor", "40"),
        ]))
        .unwrap();

        assert_eq!(params.filter, pairs(&[("name", "edge"), ("priority__gt", "3")]));
        assert_eq!(
            params.page,
            PageRequest {
                limit: Some(10),
                offset: Some(20),
                cursor: Some("40".into()),
            }
        );
        assert!(params.order.is_empty());
    }

    #[test]
    fn page_and_per_page_become_offset() {
        let params = split(pairs(&[("page", "3"), ("per_page", "25")])).unwrap();
        assert_eq!(params.page.limit, Some(25));
        assert_eq!(params.page.offset, Some(50));

        let explicit = split(pairs(&[("page", "3"), ("limit", "10"), ("offset", "7")])).unwrap();
        assert_eq!(explicit.page.offset, Some(7));

        assert!(split(pairs(&[("page", "0"), ("per_page", "5")])).is_err());
        assert!(split(pairs(&[("page", "2")])).is_err());
    }

    #[test]
    fn order_syntaxes() {
        let params = split(pairs(&[("order", "name,-priority"), ("sort_by", "created_at__desc, id asc")])).unwrap();
        assert_eq!(
            params.order,
            vec![
                OrderTerm::asc("name"),
                OrderTerm::desc("priority"),
                OrderTerm::desc("created_at"),
                OrderTerm::asc("id"),
            ]
        );

        assert!(order_terms("order", "name__sideways").is_err());
        assert!(order_terms("order", "na-me").is_err());
        assert!(order_terms("order_by", "\"name\"; drop table").is_err());
    }

    #[test]
    fn malformed_numbers_are_syntax_errors() {
        for (key, value) in [("limit", "ten"), ("limit", "-1"), ("offset", "1.5"), ("per_page", "")] {
            let err = split(pairs(&[(key, value)])).unwrap_err();
            assert!(matches!(err, FilterError::Syntax { ref param, .. } if param == key), "{key}={value}");
        }
    }

    #[test]
    fn oversized_limit_is_kept_for_clamping() {
        let params = split(pairs(&[("limit", "100000")])).unwrap();
        assert_eq!(params.page.limit, Some(100_000));
    }

    #[test]
    fn offsets_past_bigint_are_rejected() {
        let max = MAX_OFFSET.to_string();
        assert_eq!(split(pairs(&[("offset", max.as_str())])).unwrap().page.offset, Some(MAX_OFFSET));

        let err = split(pairs(&[("offset", "18446744073709551615")])).unwrap_err();
        assert!(matches!(err, FilterError::Syntax { ref param, .. } if param == "offset"));

        let err = split(pairs(&[("page", "184467440737095517"), ("per_page", "100")])).unwrap_err();
        assert!(matches!(err, FilterError::Syntax { ref param, .. } if param == "page"));
    }
}
