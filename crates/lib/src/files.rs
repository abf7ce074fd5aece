//! File library: upload, indexing status, the listed files, and the selection used
//! as context for document queries.

use futures_util::StreamExt;
use std::path::PathBuf;
use tokio::sync::watch;

use crate::api::{ApiClient, ApiError, StatusUpdate, UploadOutcome, UploadedFile};

/// Upper bound on selected files for one document query.
pub const MAX_SELECTED_FILES: usize = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("at most {} documents can be selected", MAX_SELECTED_FILES)]
    LimitReached,
}

/// Selected file ids in selection order; never more than [`MAX_SELECTED_FILES`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: Vec<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    /// Add (`checked`) or remove `id`. Returns whether the set changed.
    pub fn toggle(&mut self, id: &str, checked: bool) -> Result<bool, SelectionError> {
        if checked {
            if self.contains(id) {
                return Ok(false);
            }
            if self.ids.len() >= MAX_SELECTED_FILES {
                return Err(SelectionError::LimitReached);
            }
            self.ids.push(id.to_string());
            Ok(true)
        } else {
            let before = self.ids.len();
            self.ids.retain(|i| i != id);
            Ok(self.ids.len() != before)
        }
    }
}

/// Called with the full selection after every change.
pub type SelectionListener = Box<dyn FnMut(&[String]) + Send>;

/// Listener that publishes the selection on a watch channel (e.g. for a [`crate::composer::Composer`]).
pub fn forward_selection(tx: watch::Sender<Vec<String>>) -> SelectionListener {
    Box::new(move |ids| {
        let _ = tx.send(ids.to_vec());
    })
}

pub struct FileLibrary {
    api: ApiClient,
    files: Vec<UploadedFile>,
    selection: SelectionSet,
    processing: bool,
    status: Option<String>,
    on_selection: Option<SelectionListener>,
}

impl FileLibrary {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            files: Vec::new(),
            selection: SelectionSet::new(),
            processing: false,
            status: None,
            on_selection: None,
        }
    }

    /// Register the listener for selection changes. It is called once right away.
    pub fn on_selection_change(&mut self, mut listener: SelectionListener) {
        listener(self.selection.ids());
        self.on_selection = Some(listener);
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// True while a queued upload is being indexed. A display hint, not a lock.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Latest progress label from the status channel.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Fetch the file list and replace the local copy wholesale.
    pub async fn list_files(&mut self) -> Result<&[UploadedFile], ApiError> {
        let files = self.api.list_files().await?;
        log::info!("file list refreshed: {} file(s)", files.len());
        self.files = files;
        Ok(&self.files)
    }

    pub fn toggle_selection(&mut self, id: &str, checked: bool) -> Result<(), SelectionError> {
        match self.selection.toggle(id, checked) {
            Ok(true) => {
                if let Some(listener) = self.on_selection.as_mut() {
                    listener(self.selection.ids());
                }
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                log::warn!("selection of {} rejected: {}", id, e);
                Err(e)
            }
        }
    }

    /// Upload files. A queued upload turns on the processing flag; follow it with
    /// [`FileLibrary::track_status`]. A duplicate changes nothing. A synchronously indexed
    /// upload refreshes the list.
    pub async fn upload(&mut self, paths: &[PathBuf]) -> Result<UploadOutcome, ApiError> {
        let outcome = match self.api.upload_files(paths).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.processing = false;
                return Err(e);
            }
        };
        match &outcome {
            UploadOutcome::Queued { task_id } => {
                log::info!("upload queued as task {}", task_id);
                self.processing = true;
                self.status = None;
            }
            UploadOutcome::Duplicate { filename, uploadtime } => {
                log::info!("{} was already uploaded on {}", filename, uploadtime);
            }
            UploadOutcome::Indexed { filenames } => {
                log::info!("indexed {}", filenames.join(", "));
                self.list_files().await?;
            }
        }
        Ok(outcome)
    }

    /// Follow the status channel for `task_id`, reporting each label, until `done`; then clear
    /// the processing flag and refresh the list. A channel that fails or closes early also
    /// clears the flag.
    pub async fn track_status<F>(&mut self, task_id: &str, mut on_status: F) -> Result<(), ApiError>
    where
        F: FnMut(&str),
    {
        let result = self.follow_status(task_id, &mut on_status).await;
        self.processing = false;
        self.status = None;
        match result {
            Ok(true) => {
                self.list_files().await?;
                Ok(())
            }
            Ok(false) => {
                log::warn!("status channel for {} closed before done", task_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn follow_status<F>(&mut self, task_id: &str, on_status: &mut F) -> Result<bool, ApiError>
    where
        F: FnMut(&str),
    {
        let mut updates = self.api.status_events(task_id).await?;
        while let Some(update) = updates.next().await {
            match update? {
                StatusUpdate::Progress(label) => {
                    on_status(&label);
                    self.status = Some(label);
                }
                StatusUpdate::Done => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Upload, then follow indexing when it was queued.
    pub async fn upload_and_track<F>(
        &mut self,
        paths: &[PathBuf],
        on_status: F,
    ) -> Result<UploadOutcome, ApiError>
    where
        F: FnMut(&str),
    {
        let outcome = self.upload(paths).await?;
        if let UploadOutcome::Queued { task_id } = &outcome {
            self.track_status(task_id, on_status).await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn full_set() -> SelectionSet {
        let mut set = SelectionSet::new();
        for i in 0..MAX_SELECTED_FILES {
            assert!(set.toggle(&format!("f{}", i), true).unwrap());
        }
        set
    }

    #[test]
    fn eleventh_add_rejected_and_set_unchanged() {
        let mut set = full_set();
        let before = set.clone();
        assert_eq!(set.toggle("f10", true), Err(SelectionError::LimitReached));
        assert_eq!(set, before);
        assert_eq!(set.len(), MAX_SELECTED_FILES);
    }

    #[test]
    fn re_adding_member_of_full_set_is_noop() {
        let mut set = full_set();
        assert_eq!(set.toggle("f3", true), Ok(false));
    }

    #[test]
    fn add_then_remove_restores_prior_state() {
        let mut set = SelectionSet::new();
        set.toggle("a", true).unwrap();
        let before = set.clone();
        set.toggle("b", true).unwrap();
        set.toggle("b", false).unwrap();
        assert_eq!(set, before);
    }

    #[test]
    fn removing_absent_id_is_noop() {
        let mut set = SelectionSet::new();
        assert_eq!(set.toggle("x", false), Ok(false));
    }

    #[test]
    fn listener_sees_every_change_but_not_rejections() {
        let mut lib = FileLibrary::new(ApiClient::new(None));
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
        let sink = seen.clone();
        lib.on_selection_change(Box::new(move |ids| sink.lock().unwrap().push(ids.to_vec())));

        lib.toggle_selection("a", true).unwrap();
        lib.toggle_selection("a", true).unwrap();
        lib.toggle_selection("a", false).unwrap();
        for i in 0..MAX_SELECTED_FILES {
            lib.toggle_selection(&i.to_string(), true).unwrap();
        }
        assert!(lib.toggle_selection("extra", true).is_err());

        let seen = seen.lock().unwrap();
        // initial call + add a + remove a + ten adds
        assert_eq!(seen.len(), 1 + 2 + MAX_SELECTED_FILES);
        assert_eq!(seen.last().unwrap().len(), MAX_SELECTED_FILES);
    }

    #[test]
    fn forward_selection_publishes_on_watch() {
        let (tx, rx) = watch::channel(Vec::new());
        let mut lib = FileLibrary::new(ApiClient::new(None));
        lib.on_selection_change(forward_selection(tx));
        lib.toggle_selection("42", true).unwrap();
        assert_eq!(*rx.borrow(), vec!["42".to_string()]);
    }
}
