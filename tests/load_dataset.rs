use recmaster_rs::config::PopularTieBreak;
use recmaster_rs::model::remove_scores;
use recmaster_rs::monitor::TASK_LOAD_DATASET;
use recmaster_rs::storage::{self, CacheStore};
use recmaster_rs::test_support::{load_dataset_fixture, master_with};
use recmaster_rs::{Config, NodeInfo, NodeType, TaskStatus};
use std::sync::Arc;

fn config() -> Config {
    let mut config = Config::default();
    config.database.cache_size = 3;
    config.database.batch_size = 4;
    config
}

#[test]
fn load_dataset_counts_and_views() -> anyhow::Result<()> {
    let master = master_with(&load_dataset_fixture(), config())?;
    let dataset = master.load_dataset()?;

    assert_eq!(dataset.users.len(), 6);
    assert_eq!(dataset.items.len(), 10);
    assert_eq!(dataset.matching_train.count() + dataset.matching_test.count(), 30);
    assert_eq!(dataset.matching_train.user_count(), 6);
    assert_eq!(dataset.matching_train.item_count(), 10);

    // the hidden item drops five positive rows
    let classification = dataset.classification_train.count() + dataset.classification_test.count();
    assert_eq!(classification, 45);
    let negatives =
        dataset.classification_train.negative_count + dataset.classification_test.negative_count;
    assert_eq!(negatives, 20);

    let stats = master.stats()?;
    assert_eq!(stats.num_users, 6);
    assert_eq!(stats.num_items, 10);
    assert_eq!(stats.num_user_labels, 2);
    assert_eq!(stats.num_item_labels, 3);
    assert_eq!(stats.num_total_pos_feedbacks, 30);
    assert_eq!(stats.num_valid_pos_feedbacks, 30);
    assert_eq!(stats.num_valid_neg_feedbacks, 20);

    let task = master.monitor().get(TASK_LOAD_DATASET).expect("task registered");
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.done, task.total);
    Ok(())
}

#[test]
fn load_dataset_publishes_rankings() -> anyhow::Result<()> {
    let master = master_with(&load_dataset_fixture(), config())?;
    master.load_dataset()?;

    let popular = master.popular("", 0, 10)?;
    assert_eq!(remove_scores(&popular), ["8", "6", "7"]);
    assert_eq!(popular[0].score, 5.0);
    assert_eq!(remove_scores(&master.popular("even", 0, 10)?), ["8", "6", "4"]);
    assert_eq!(remove_scores(&master.popular("odd", 0, 10)?), ["7", "5", "3"]);

    assert_eq!(remove_scores(&master.latest("", 0, 10)?), ["8", "7", "6"]);
    assert_eq!(remove_scores(&master.latest("odd", 0, 10)?), ["7", "3", "1"]);

    assert_eq!(master.categories()?, ["even", "odd"]);
    Ok(())
}

#[test]
fn popular_ties_can_break_by_item_id() -> anyhow::Result<()> {
    let mut config = config();
    config.database.cache_size = 10;
    config.recommend.popular_tie_break = PopularTieBreak::ItemId;
    let master = master_with(&load_dataset_fixture(), config)?;
    master.load_dataset()?;

    let popular = master.popular("", 0, 10)?;
    assert_eq!(remove_scores(&popular), ["8", "6", "7", "4", "5", "2", "3", "0", "1"]);
    for pair in popular.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    Ok(())
}

#[test]
fn node_counts_are_published_with_the_dataset() -> anyhow::Result<()> {
    let master = master_with(&load_dataset_fixture(), config())?;
    master.heartbeat(NodeInfo::new("w1", NodeType::Worker, "10.0.0.1:8087"));
    master.heartbeat(NodeInfo::new("s1", NodeType::Server, "10.0.0.2:8087"));
    master.load_dataset()?;

    let meta = master.cache_store();
    assert_eq!(meta.get_int(storage::GLOBAL_META, storage::NUM_WORKERS)?, 1);
    assert_eq!(meta.get_int(storage::GLOBAL_META, storage::NUM_SERVERS)?, 1);
    Ok(())
}

#[test]
fn reload_replaces_the_dataset() -> anyhow::Result<()> {
    let master = master_with(&load_dataset_fixture(), config())?;
    let first = master.load_dataset()?;
    let second = master.load_dataset()?;

    assert!(!Arc::ptr_eq(&first, &second));
    let current = master.dataset().expect("dataset loaded");
    assert!(Arc::ptr_eq(&current, &second));
    assert_eq!(first.stats, second.stats);
    Ok(())
}
