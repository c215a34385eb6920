use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use strand_core::{StreamIndex, StreamMetadata, StreamStatus, TaskDocument};

use crate::cli::StreamAction;
use crate::error::MainError;
use crate::render;
use crate::workspace::Workspace;

pub fn run_stream(
    workspace: &Workspace,
    selected: Option<&str>,
    action: StreamAction,
) -> Result<(), MainError> {
    match action {
        StreamAction::Init { id, name } => init_stream(workspace, &id, name),
        StreamAction::List { json } => list_streams(workspace, json),
        StreamAction::Use { id } => use_stream(workspace, &id),
        StreamAction::Remove {
            id,
            delete_artifacts,
        } => remove_stream(workspace, &id, delete_artifacts),
        StreamAction::Hold { status, clear } => {
            let stream_id = workspace.resolve_stream(selected)?;
            let status = match (clear, status) {
                (true, _) => None,
                (false, Some(raw)) => Some(raw.parse::<StreamStatus>().map_err(MainError::Args)?),
                (false, None) => Some(StreamStatus::OnHold),
            };
            set_status_override(workspace, &stream_id, status)
        }
    }
}

fn validate_stream_id(id: &str) -> Result<(), MainError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(MainError::Args(format!(
            "invalid stream id '{id}': use letters, digits, '-', '_' or '.'"
        )))
    }
}

pub fn init_stream(workspace: &Workspace, id: &str, name: Option<String>) -> Result<(), MainError> {
    validate_stream_id(id)?;
    let order = workspace
        .index_store()
        .modify_or_else(StreamIndex::default, |index| -> Result<u32, MainError> {
            let order = index.next_order();
            let name = name.unwrap_or_else(|| id.to_string());
            index.add_stream(StreamMetadata::new(id, name, order))?;
            if index.current_stream.is_none() {
                index.set_current(id)?;
            }
            Ok(order)
        })?;

    let tasks = workspace.task_store(id);
    if !tasks.exists() {
        tasks.save(&mut TaskDocument::new(id))?;
    }
    tracing::info!(stream = id, order, "initialized stream");
    println!("initialized stream {id} (order {order})");
    Ok(())
}

fn list_streams(workspace: &Workspace, json: bool) -> Result<(), MainError> {
    let index = match workspace.index_store().load() {
        Ok(index) => index,
        Err(strand_store::StoreError::IndexNotFound { .. }) => StreamIndex::default(),
        Err(err) => return Err(err.into()),
    };
    let mut streams = index.streams.clone();
    streams.sort_by_key(|stream| stream.order);

    if json {
        let body =
            serde_json::to_string_pretty(&streams).map_err(|source| MainError::Encode { source })?;
        println!("{body}");
        return Ok(());
    }
    if streams.is_empty() {
        println!("no streams; run `strand stream init <id>`");
        return Ok(());
    }
    for stream in &streams {
        let marker = if index.current_stream.as_deref() == Some(stream.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{}", render::stream_line(marker, stream));
    }
    Ok(())
}

fn use_stream(workspace: &Workspace, id: &str) -> Result<(), MainError> {
    workspace
        .index_store()
        .modify(|index| -> Result<(), MainError> { Ok(index.set_current(id)?) })?;
    println!("current stream: {id}");
    Ok(())
}

fn remove_stream(workspace: &Workspace, id: &str, delete_artifacts: bool) -> Result<(), MainError> {
    let removed = workspace
        .index_store()
        .modify(|index| -> Result<StreamMetadata, MainError> { Ok(index.remove_stream(id)?) })?;
    tracing::info!(stream = %removed.id, delete_artifacts, "removed stream");

    if delete_artifacts {
        remove_dir_if_present(&workspace.paths.stream_dir(id))?;
        remove_dir_if_present(workspace.scratch(id).dir())?;
    }
    println!("removed stream {id}");
    Ok(())
}

fn remove_dir_if_present(path: &Path) -> Result<(), MainError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(MainError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn set_status_override(
    workspace: &Workspace,
    stream_id: &str,
    status: Option<StreamStatus>,
) -> Result<(), MainError> {
    let tasks = workspace.load_tasks(stream_id)?;
    let effective = workspace
        .index_store()
        .modify(|index| -> Result<StreamStatus, MainError> {
            let stream = index.require_mut(stream_id)?;
            stream.status_override = status;
            stream.refresh_status(&tasks.tasks);
            Ok(stream.status)
        })?;
    match status {
        Some(_) => println!("stream {stream_id} status set to {effective}"),
        None => println!("stream {stream_id} status override cleared ({effective})"),
    }
    Ok(())
}
