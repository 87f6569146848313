use super::Item;

/// Case-insensitive substring filter on `id` and `author`.
///
/// An empty query returns every item. Input order is preserved.
pub fn filter_items(items: &[Item], query: &str) -> Vec<Item> {
    if query.is_empty() {
        return items.to_vec();
    }

    let needle = query.to_lowercase();
    items
        .iter()
        .filter(|item| {
            item.id.to_lowercase().contains(&needle)
                || item.author.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}
