use super::{new_task, setup_db};
use crate::db::TaskFilter;
use crate::types::{Status, TaskId};

#[tokio::test]
async fn insert_and_get_roundtrip() {
    let (db, _temp) = setup_db().await;

    let id = db.insert_task(&new_task("https://example.com/a.bin")).await.unwrap();
    let task = db.get_task(id).await.unwrap().unwrap();

    assert_eq!(task.url, "https://example.com/a.bin");
    assert_eq!(task.total_bytes, -1, "size unknown until discovery");
    assert_eq!(task.completed_bytes, 0);
    assert!(!task.is_complete);
    assert!(!task.is_group_child);
}

#[tokio::test]
async fn get_missing_task_returns_none() {
    let (db, _temp) = setup_db().await;
    assert!(db.get_task(TaskId(4242)).await.unwrap().is_none());
}

#[tokio::test]
async fn source_key_is_unique() {
    let (db, _temp) = setup_db().await;

    db.insert_task(&new_task("https://example.com/a.bin")).await.unwrap();
    let duplicate = db.insert_task(&new_task("https://example.com/a.bin")).await;

    assert!(duplicate.is_err(), "same identity must not produce two rows");
}

#[tokio::test]
async fn find_by_source_key_resolves_identity() {
    let (db, _temp) = setup_db().await;

    let id = db.insert_task(&new_task("https://example.com/a.bin")).await.unwrap();
    let found = db
        .find_by_source_key("https://example.com/a.bin")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.id, id.get());
}

#[tokio::test]
async fn find_by_url_excludes_group_members() {
    let (db, _temp) = setup_db().await;

    db.insert_task(&new_task("https://example.com/a.bin")).await.unwrap();

    let group_id = db.insert_group(&super::new_group("hash-a")).await.unwrap();
    let mut member = new_task("https://example.com/a.bin");
    member.source_key = "hash-a:https://example.com/a.bin".to_string();
    member.is_group_child = true;
    member.group_id = Some(group_id.get());
    db.insert_task(&member).await.unwrap();

    let found = db.find_by_url("https://example.com/a.bin").await.unwrap();
    assert_eq!(found.len(), 1, "group member must not appear in url lookup");
    assert!(!found[0].is_group_child);
}

#[tokio::test]
async fn metadata_and_progress_updates() {
    let (db, _temp) = setup_db().await;

    let id = db.insert_task(&new_task("https://example.com/a.bin")).await.unwrap();
    db.update_metadata(id, Some(1000), true).await.unwrap();
    db.update_progress(id, 400).await.unwrap();
    db.update_status(id, Status::Transferring.to_i32()).await.unwrap();

    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.total_bytes, 1000);
    assert_eq!(task.completed_bytes, 400);
    assert!(task.resumable);
    assert_eq!(Status::from_i32(task.status), Status::Transferring);
}

#[tokio::test]
async fn mark_complete_sets_flag_and_final_bytes() {
    let (db, _temp) = setup_db().await;

    let id = db.insert_task(&new_task("https://example.com/a.bin")).await.unwrap();
    db.update_metadata(id, Some(1000), true).await.unwrap();
    db.update_progress(id, 990).await.unwrap();
    db.mark_complete(id, Status::Complete.to_i32()).await.unwrap();

    let task = db.get_task(id).await.unwrap().unwrap();
    assert!(task.is_complete);
    assert_eq!(task.completed_bytes, 1000, "final bytes snap to total");
    assert!(task.completed_at.is_some());
    assert!(task.error_message.is_none());
}

#[tokio::test]
async fn list_tasks_filters_and_paginates() {
    let (db, _temp) = setup_db().await;

    for i in 0..5 {
        let id = db
            .insert_task(&new_task(&format!("https://example.com/{i}.bin")))
            .await
            .unwrap();
        if i < 2 {
            db.update_metadata(id, Some(10), false).await.unwrap();
            db.mark_complete(id, Status::Complete.to_i32()).await.unwrap();
        }
    }

    let complete = db.list_tasks(TaskFilter::Complete, 1, 10).await.unwrap();
    assert_eq!(complete.len(), 2);

    let incomplete = db.list_tasks(TaskFilter::Incomplete, 1, 10).await.unwrap();
    assert_eq!(incomplete.len(), 3);

    let page1 = db.list_tasks(TaskFilter::All, 1, 2).await.unwrap();
    let page2 = db.list_tasks(TaskFilter::All, 2, 2).await.unwrap();
    let page3 = db.list_tasks(TaskFilter::All, 3, 2).await.unwrap();
    assert_eq!(page1.len(), 2);
    assert_eq!(page2.len(), 2);
    assert_eq!(page3.len(), 1);
    assert_ne!(page1[0].id, page2[0].id);
}

#[tokio::test]
async fn incomplete_tasks_include_group_members() {
    let (db, _temp) = setup_db().await;

    db.insert_task(&new_task("https://example.com/a.bin")).await.unwrap();

    let group_id = db.insert_group(&super::new_group("hash-b")).await.unwrap();
    let mut member = new_task("https://example.com/b.bin");
    member.source_key = "hash-b:https://example.com/b.bin".to_string();
    member.is_group_child = true;
    member.group_id = Some(group_id.get());
    db.insert_task(&member).await.unwrap();

    let incomplete = db.get_incomplete_tasks().await.unwrap();
    assert_eq!(incomplete.len(), 2);
}

#[tokio::test]
async fn delete_task_removes_row() {
    let (db, _temp) = setup_db().await;

    let id = db.insert_task(&new_task("https://example.com/a.bin")).await.unwrap();
    db.delete_task(id).await.unwrap();

    assert!(db.get_task(id).await.unwrap().is_none());
}

#[tokio::test]
async fn incomplete_children_counts_only_open_members() {
    let (db, _temp) = setup_db().await;

    let group_id = db.insert_group(&super::new_group("hash-c")).await.unwrap();
    let mut ids = Vec::new();
    for i in 0..3 {
        let mut member = new_task(&format!("https://example.com/m{i}.bin"));
        member.source_key = format!("hash-c:https://example.com/m{i}.bin");
        member.is_group_child = true;
        member.group_id = Some(group_id.get());
        ids.push(db.insert_task(&member).await.unwrap());
    }

    assert_eq!(db.incomplete_children(group_id.get()).await.unwrap(), 3);

    db.update_metadata(ids[0], Some(10), false).await.unwrap();
    db.mark_complete(ids[0], Status::Complete.to_i32()).await.unwrap();

    assert_eq!(db.incomplete_children(group_id.get()).await.unwrap(), 2);
}
