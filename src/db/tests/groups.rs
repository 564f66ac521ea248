use super::{new_group, new_task, setup_db};
use crate::types::{GroupId, Status};

#[tokio::test]
async fn insert_and_find_by_hash() {
    let (db, _temp) = setup_db().await;

    let id = db.insert_group(&new_group("abc123")).await.unwrap();
    let found = db.find_group_by_hash("abc123").await.unwrap().unwrap();

    assert_eq!(found.id, id.get());
    assert!(!found.is_complete);
}

#[tokio::test]
async fn group_hash_is_unique() {
    let (db, _temp) = setup_db().await;

    db.insert_group(&new_group("abc123")).await.unwrap();
    assert!(db.insert_group(&new_group("abc123")).await.is_err());
}

#[tokio::test]
async fn get_missing_group_returns_none() {
    let (db, _temp) = setup_db().await;
    assert!(db.get_group(GroupId(99)).await.unwrap().is_none());
}

#[tokio::test]
async fn member_count_and_completion() {
    let (db, _temp) = setup_db().await;

    let id = db.insert_group(&new_group("abc123")).await.unwrap();
    db.update_member_count(id, 3).await.unwrap();

    assert!(db.mark_group_complete(id).await.unwrap(), "first flip wins");
    assert!(
        !db.mark_group_complete(id).await.unwrap(),
        "second flip must report already complete"
    );

    let group = db.get_group(id).await.unwrap().unwrap();
    assert_eq!(group.member_count, 3);
    assert!(group.is_complete);
}

#[tokio::test]
async fn delete_group_cascades_to_members() {
    let (db, _temp) = setup_db().await;

    let group_id = db.insert_group(&new_group("abc123")).await.unwrap();
    let mut member = new_task("https://example.com/m.bin");
    member.source_key = "abc123:https://example.com/m.bin".to_string();
    member.is_group_child = true;
    member.group_id = Some(group_id.get());
    let member_id = db.insert_task(&member).await.unwrap();

    db.delete_group(group_id).await.unwrap();

    assert!(db.get_group(group_id).await.unwrap().is_none());
    assert!(
        db.get_task(member_id).await.unwrap().is_none(),
        "member rows must cascade with the group"
    );
}

#[tokio::test]
async fn group_completion_is_conjunction_of_members() {
    let (db, _temp) = setup_db().await;

    let group_id = db.insert_group(&new_group("abc123")).await.unwrap();
    let mut ids = Vec::new();
    for i in 0..3 {
        let mut member = new_task(&format!("https://example.com/m{i}.bin"));
        member.source_key = format!("abc123:https://example.com/m{i}.bin");
        member.is_group_child = true;
        member.group_id = Some(group_id.get());
        ids.push(db.insert_task(&member).await.unwrap());
    }

    for (n, id) in ids.iter().enumerate() {
        assert_eq!(
            db.incomplete_children(group_id.get()).await.unwrap(),
            (3 - n) as i64
        );
        db.update_metadata(*id, Some(10), false).await.unwrap();
        db.mark_complete(*id, Status::Complete.to_i32()).await.unwrap();
    }

    assert_eq!(db.incomplete_children(group_id.get()).await.unwrap(), 0);
}
