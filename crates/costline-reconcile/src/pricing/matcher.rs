//! Fuzzy matching of usage identifiers against catalog keys

/// Separators between identifier tokens
const TOKEN_SEPARATORS: [char; 4] = ['_', '-', ' ', '.'];

/// Split an identifier into its non-empty tokens
pub fn tokens(identifier: &str) -> Vec<&str> {
    identifier
        .split(|c| TOKEN_SEPARATORS.contains(&c))
        .filter(|token| !token.is_empty())
        .collect()
}

/// First key whose text contains every token of `identifier`
pub fn token_subset_match<'a, I>(identifier: &str, keys: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let wanted = tokens(identifier);
    if wanted.is_empty() {
        return None;
    }
    keys.into_iter()
        .find(|key| wanted.iter().all(|token| key.contains(token)))
}

/// Key with the smallest edit distance to `identifier`, first one on ties
pub fn closest_match<'a, I>(identifier: &str, keys: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, &'a str)> = None;
    for key in keys {
        let distance = levenshtein(identifier, key);
        if best.map_or(true, |(smallest, _)| distance < smallest) {
            best = Some((distance, key));
        }
    }
    best.map(|(_, key)| key)
}

/// Levenshtein distance over chars, two-row dynamic programming
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, a_char) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(a_char != *b_char);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_split_on_all_separators() {
        assert_eq!(tokens("apm_host-count.v2 x"), vec!["apm", "host", "count", "v2", "x"]);
        assert!(tokens("__").is_empty());
    }

    #[test]
    fn test_token_subset_returns_first_in_order() {
        let keys = ["apm_hosts", "infra_hosts", "ingested_logs"];
        assert_eq!(token_subset_match("hosts", keys), Some("apm_hosts"));
        assert_eq!(token_subset_match("logs_ingested", keys), Some("ingested_logs"));
        assert_eq!(token_subset_match("fargate_tasks", keys), None);
        assert_eq!(token_subset_match("", keys), None);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("containers", "containers"), 0);
    }

    #[test]
    fn test_closest_match() {
        let keys = ["containers", "custom_metrics"];
        assert_eq!(closest_match("contaners", keys), Some("containers"));
        assert_eq!(closest_match("anything", std::iter::empty()), None);
    }
}
