use chrono::{Duration, Utc};
use recmaster_rs::config::NeighborType;
use recmaster_rs::model::remove_scores;
use recmaster_rs::monitor::TASK_FIND_USER_NEIGHBORS;
use recmaster_rs::storage::{self, CacheStore};
use recmaster_rs::test_support::{master_with, neighbor_users, scenario_config};
use recmaster_rs::{EntityType, Master, TaskStatus};

fn ids(master: &Master, id: &str) -> anyhow::Result<Vec<String>> {
    Ok(remove_scores(&master.neighbors(EntityType::User, id, 0, 10)?))
}

#[test]
fn related_users_rank_by_shared_items() -> anyhow::Result<()> {
    let mut config = scenario_config();
    config.recommend.user_neighbor_type = NeighborType::Related;
    let master = master_with(&neighbor_users(), config)?;
    master.load_dataset()?;
    let summary = master.run_find_user_neighbors()?;

    assert_eq!(summary.processed, 11);
    assert_eq!(ids(&master, "9")?, ["8", "7", "6"]);
    // no feedback, nothing in common with anyone
    assert!(ids(&master, "10")?.is_empty());

    let task = master.monitor().get(TASK_FIND_USER_NEIGHBORS).expect("task registered");
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!((task.done, task.total), (11, 11));
    Ok(())
}

#[test]
fn similar_users_rank_by_shared_labels() -> anyhow::Result<()> {
    let mut config = scenario_config();
    config.recommend.user_neighbor_type = NeighborType::Similar;
    let master = master_with(&neighbor_users(), config)?;
    master.load_dataset()?;
    master.run_find_user_neighbors()?;

    assert_eq!(ids(&master, "8")?, ["0", "1", "2"]);
    Ok(())
}

#[test]
fn auto_uses_labels_only_for_recently_modified_users() -> anyhow::Result<()> {
    let master = master_with(&neighbor_users(), scenario_config())?;
    master.load_dataset()?;
    master.run_find_user_neighbors()?;
    assert_eq!(ids(&master, "8")?, ["9", "7", "6"]);

    master
        .cache_store()
        .set_time(storage::LAST_MODIFY_USER_TIME, "8", Utc::now() + Duration::days(1))?;
    master.run_find_user_neighbors()?;
    assert_eq!(ids(&master, "8")?, ["0", "1", "2"]);
    Ok(())
}

#[test]
fn approximate_user_index_reports_recall() -> anyhow::Result<()> {
    let mut config = scenario_config();
    config.recommend.user_neighbor_type = NeighborType::Related;
    config.recommend.enable_user_neighbor_index = true;
    config.recommend.user_neighbor_index_recall = 1.0;
    config.recommend.user_neighbor_index_fit_epoch = 10;
    let master = master_with(&neighbor_users(), config)?;
    master.load_dataset()?;
    master.run_find_user_neighbors()?;

    assert_eq!(ids(&master, "9")?, ["8", "7", "6"]);
    let stats = master.stats()?;
    assert_eq!(stats.user_neighbor_index_recall, Some(1.0));
    assert_eq!(stats.item_neighbor_index_recall, None);
    Ok(())
}
