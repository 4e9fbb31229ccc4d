use crate::ids::MessageId;
use crate::message::{Message, MessagePatch};
use crate::state::LoadFailure;

/// Bounded, strictly ascending slice of one conversation's history.
///
/// `at_top` / `at_bottom` record whether the first / last element is the true
/// edge of the history. Evicting from an end always clears its flag.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderWindow {
    messages: Vec<Message>,
    at_top: bool,
    at_bottom: bool,
    load_error: Option<LoadFailure>,
}

/// Result of extending the window with one fetched page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageMerge {
    /// Messages that actually entered the window.
    pub added: usize,
    /// Messages pushed out of the opposite end by the size cap.
    pub evicted: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveInsert {
    Duplicate,
    /// Older than the first loaded message while earlier history is still unloaded;
    /// pagination will bring it in.
    OutsideWindow,
    Inserted {
        /// True when the id landed before the current tail.
        out_of_order: bool,
        evicted: Vec<Message>,
    },
}

impl RenderWindow {
    /// Builds the window for a "latest messages" fetch. `None` means the conversation is empty.
    pub fn latest(page: Vec<Message>, page_size: usize, max_window: usize) -> Option<Self> {
        let fetched = page.len();
        let mut messages = sorted_unique(page);
        if messages.is_empty() {
            return None;
        }

        let mut at_top = fetched < page_size;
        if messages.len() > max_window {
            messages.drain(..messages.len() - max_window);
            at_top = false;
        }

        Some(Self {
            messages,
            at_top,
            at_bottom: true,
            load_error: None,
        })
    }

    /// Builds the window around a permalink anchor; neither edge is known.
    pub fn around(page: Vec<Message>, max_window: usize) -> Option<Self> {
        let mut messages = sorted_unique(page);
        if messages.is_empty() {
            return None;
        }

        if messages.len() > max_window {
            let excess = messages.len() - max_window;
            let leading = excess / 2;
            messages.truncate(messages.len() - (excess - leading));
            messages.drain(..leading);
        }

        Some(Self {
            messages,
            at_top: false,
            at_bottom: false,
            load_error: None,
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn at_top(&self) -> bool {
        self.at_top
    }

    pub fn at_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn load_error(&self) -> Option<&LoadFailure> {
        self.load_error.as_ref()
    }

    pub fn first_id(&self) -> Option<&MessageId> {
        self.messages.first().map(|message| &message.id)
    }

    pub fn last_id(&self) -> Option<&MessageId> {
        self.messages.last().map(|message| &message.id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    pub(crate) fn set_load_error(&mut self, failure: Option<LoadFailure>) {
        self.load_error = failure;
    }

    /// Prepends a page of older messages and evicts from the bottom past `max_window`.
    ///
    /// An empty page means the start of history was reached.
    pub fn prepend_page(
        &mut self,
        page: Vec<Message>,
        page_size: usize,
        max_window: usize,
    ) -> PageMerge {
        let fetched = page.len();
        if fetched == 0 {
            self.at_top = true;
            return PageMerge::default();
        }
        self.at_top = fetched < page_size;

        let mut older = sorted_unique(page);
        if let Some(first) = self.first_id() {
            older.retain(|message| message.id < *first);
        }
        let added = older.len();

        older.append(&mut self.messages);
        self.messages = older;

        let evicted = if self.messages.len() > max_window {
            self.at_bottom = false;
            self.messages.split_off(max_window)
        } else {
            Vec::new()
        };

        PageMerge { added, evicted }
    }

    /// Appends a page of newer messages and evicts from the top past `max_window`.
    pub fn append_page(
        &mut self,
        page: Vec<Message>,
        page_size: usize,
        max_window: usize,
    ) -> PageMerge {
        let fetched = page.len();
        if fetched == 0 {
            self.at_bottom = true;
            return PageMerge::default();
        }
        self.at_bottom = fetched < page_size;

        let mut newer = sorted_unique(page);
        if let Some(last) = self.last_id() {
            newer.retain(|message| message.id > *last);
        }
        let added = newer.len();
        self.messages.append(&mut newer);

        let evicted = self.evict_top(max_window);
        PageMerge { added, evicted }
    }

    /// Inserts a live-pushed message at its sorted position.
    ///
    /// Ids before the first message are only accepted once the window holds the
    /// start of history, so the window never skips over unloaded messages.
    pub fn insert_live(&mut self, message: Message, max_window: usize) -> LiveInsert {
        let before_first = self
            .first_id()
            .is_some_and(|first| message.id < *first);
        if before_first && !self.at_top {
            return LiveInsert::OutsideWindow;
        }

        let index = match self
            .messages
            .binary_search_by(|entry| entry.id.cmp(&message.id))
        {
            Ok(_) => return LiveInsert::Duplicate,
            Err(index) => index,
        };

        let out_of_order = index < self.messages.len();
        self.messages.insert(index, message);
        let evicted = self.evict_top(max_window);
        LiveInsert::Inserted {
            out_of_order,
            evicted,
        }
    }

    pub fn edit(&mut self, id: &MessageId, patch: &MessagePatch) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        patch.apply(&mut self.messages[index]);
        true
    }

    pub fn remove(&mut self, id: &MessageId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.messages.remove(index);
        true
    }

    fn evict_top(&mut self, max_window: usize) -> Vec<Message> {
        if self.messages.len() <= max_window {
            return Vec::new();
        }

        self.at_top = false;
        let excess = self.messages.len() - max_window;
        self.messages.drain(..excess).collect()
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages
            .binary_search_by(|entry| entry.id.cmp(id))
            .ok()
    }
}

fn sorted_unique(mut page: Vec<Message>) -> Vec<Message> {
    page.sort_by(|left, right| left.id.cmp(&right.id));
    page.dedup_by(|right, left| right.id == left.id);
    page
}
