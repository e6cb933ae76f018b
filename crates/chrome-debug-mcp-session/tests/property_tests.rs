//! Property-based tests for session state and the console log buffer.

use proptest::prelude::*;

use chrome_debug_mcp_core::{ConnectionId, PageTarget};
use chrome_debug_mcp_session::{ConsoleLogBuffer, SessionState, MAX_CONSOLE_LOGS};

fn pages(n: usize) -> Vec<PageTarget> {
    (0..n)
        .map(|i| PageTarget {
            target_id: format!("P{i}"),
            url: format!("https://example.com/{i}"),
            title: format!("Page {i}"),
        })
        .collect()
}

proptest! {
    /// After N >= cap appends the buffer holds exactly the most recent cap lines in order.
    #[test]
    fn console_buffer_keeps_most_recent(n in MAX_CONSOLE_LOGS..MAX_CONSOLE_LOGS + 600) {
        let mut buffer = ConsoleLogBuffer::new();
        for i in 0..n {
            buffer.push(&format!("line {i}"));
        }

        let entries = buffer.entries();
        prop_assert_eq!(entries.len(), MAX_CONSOLE_LOGS);
        let first = n - MAX_CONSOLE_LOGS;
        for (offset, entry) in entries.iter().enumerate() {
            let expected = format!("] line {}", first + offset);
            prop_assert!(entry.ends_with(&expected), "{} does not end with {}", entry, expected);
        }
    }

    /// Out-of-range selection writes leave the state unchanged.
    #[test]
    fn out_of_range_selection_is_noop(
        len in 0usize..12,
        selected in 0usize..12,
        write in 0usize..64,
    ) {
        let mut state = SessionState::new();
        state.set_pages(ConnectionId::new(), pages(len));
        state.select_page(selected);
        let before = state.selected_page_index;

        let accepted = state.select_page(write);
        if write < len {
            prop_assert!(accepted);
            prop_assert_eq!(state.current_page().map(|p| p.target_id.clone()), Some(format!("P{write}")));
        } else {
            prop_assert!(!accepted);
            prop_assert_eq!(state.selected_page_index, before);
        }
    }

    /// Without pages there is no current page, whatever the stored index.
    #[test]
    fn empty_pages_have_no_current_page(index in any::<usize>()) {
        let mut state = SessionState::new();
        state.selected_page_index = index;
        prop_assert!(state.current_page().is_none());
    }

    /// The selected page always lies within the page list after re-enumeration.
    #[test]
    fn reenumeration_clamps_selection(before in 1usize..20, after in 0usize..20, pick in 0usize..20) {
        let mut state = SessionState::new();
        let conn = ConnectionId::new();
        state.set_pages(conn, pages(before));
        state.select_page(pick.min(before - 1));

        state.set_pages(conn, pages(after));
        match state.current_page() {
            Some(page) => {
                prop_assert!(state.selected_page_index < after);
                prop_assert_eq!(&page.target_id, &format!("P{}", state.selected_page_index));
            }
            None => prop_assert_eq!(after, 0),
        }
    }
}
