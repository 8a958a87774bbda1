//! Basic usage of the `paged_vec` crate:
//!
//! * Creating a collection.
//! * Adding items and observing that they do not move.
//! * Walking and erasing with cursors.
//! * Releasing unused pages.

use std::ptr;

use paged_vec::PagedVec;

fn main() {
    let mut names = PagedVec::<String, 4>::new();

    names.push("Alice".to_string());
    names.push("Bob".to_string());

    let alice: *const String = &names[0];

    // Growing allocates new pages but never relocates existing items.
    for i in 0..20 {
        names.push(format!("Guest {i}"));
    }

    println!(
        "Collection contains {} items in {} pages, with a capacity of {}",
        names.len(),
        names.page_count(),
        names.capacity()
    );
    println!("Alice stayed in place: {}", ptr::eq(alice, &names[0]));

    // Cursors do not borrow the collection, so we can erase while walking.
    let mut cursor = names.begin();

    while cursor != names.end() {
        if names.at_cursor(cursor).starts_with("Guest") {
            cursor = names.erase(cursor);
        } else {
            names.advance(&mut cursor);
        }
    }

    println!("After removing guests: {names:?}");

    // Pages past the last item are only released on request.
    names.shrink_to_fit();
    println!(
        "After shrinking: {} pages, capacity {}",
        names.page_count(),
        names.capacity()
    );
}
