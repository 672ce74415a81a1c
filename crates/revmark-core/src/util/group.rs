/// Splits `items` into runs of consecutive elements sharing the same key.
pub fn group_adjacent<T, K, F>(items: impl IntoIterator<Item = T>, key_selector: F) -> Vec<Vec<T>>
where
    K: Eq,
    F: Fn(&T) -> K,
{
    let mut result: Vec<Vec<T>> = Vec::new();
    let mut current_group: Option<(K, Vec<T>)> = None;

    for item in items {
        let key = key_selector(&item);

        match &mut current_group {
            Some((current_key, group)) if *current_key == key => {
                group.push(item);
            }
            _ => {
                if let Some((_, group)) = current_group.take() {
                    result.push(group);
                }
                current_group = Some((key, vec![item]));
            }
        }
    }

    if let Some((_, group)) = current_group {
        result.push(group);
    }

    result
}

/// Like [`group_adjacent`] but over index ranges of a slice.
pub fn adjacent_ranges<T, K, F>(items: &[T], key_selector: F) -> Vec<std::ops::Range<usize>>
where
    K: Eq,
    F: Fn(&T) -> K,
{
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let key = key_selector(&items[start]);
        let mut end = start + 1;
        while end < items.len() && key_selector(&items[end]) == key {
            end += 1;
        }
        ranges.push(start..end);
        start = end;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_adjacent_groups_consecutive_equal_keys() {
        let items = vec![1, 1, 2, 2, 2, 1, 3, 3];
        let groups = group_adjacent(items, |&x| x);

        assert_eq!(groups.len(), 4);
        assert_eq!(groups[0], vec![1, 1]);
        assert_eq!(groups[1], vec![2, 2, 2]);
        assert_eq!(groups[2], vec![1]);
        assert_eq!(groups[3], vec![3, 3]);
    }

    #[test]
    fn group_adjacent_with_strings() {
        let items = vec!["aa", "ab", "ba", "bb"];
        let groups = group_adjacent(items, |s| s.chars().next());

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec!["aa", "ab"]);
        assert_eq!(groups[1], vec!["ba", "bb"]);
    }

    #[test]
    fn adjacent_ranges_cover_slice() {
        let items = [1, 1, 2, 1];
        assert_eq!(adjacent_ranges(&items, |&x| x), vec![0..2, 2..3, 3..4]);
        assert!(adjacent_ranges::<i32, i32, _>(&[], |&x| x).is_empty());
    }
}
