use recmaster_rs::config::NeighborType;
use recmaster_rs::model::Scored;
use recmaster_rs::storage::{self, CacheStore};
use recmaster_rs::test_support::{master_with, neighbor_items, scenario_config};
use recmaster_rs::{Master, RecError};

fn prepared(fallbacks: &[&str]) -> anyhow::Result<Master> {
    let mut config = scenario_config();
    config.recommend.item_neighbor_type = NeighborType::Related;
    config.recommend.fallback_recommend = fallbacks.iter().map(|s| s.to_string()).collect();
    let master = master_with(&neighbor_items(), config)?;
    master.load_dataset()?;
    master.run_find_item_neighbors()?;
    Ok(master)
}

#[test]
fn configured_chain_falls_back_to_popular() -> anyhow::Result<()> {
    let master = prepared(&["popular"])?;
    assert_eq!(master.recommend("10", "", 3)?, ["9", "8", "7"]);
    Ok(())
}

#[test]
fn offline_list_comes_first_and_seen_items_are_skipped() -> anyhow::Result<()> {
    let master = prepared(&["popular"])?;
    master.cache_store().set_sorted(
        &storage::key(storage::OFFLINE_RECOMMEND, &["10"]),
        &[Scored::new("5", 2.0), Scored::new("10", 1.0)],
    )?;
    assert_eq!(master.recommend("10", "", 3)?, ["5", "9", "8"]);
    Ok(())
}

#[test]
fn overlapping_offline_list_still_fills_from_fallback() -> anyhow::Result<()> {
    let master = prepared(&["popular"])?;
    master.cache_store().set_sorted(
        &storage::key(storage::OFFLINE_RECOMMEND, &["10"]),
        &[Scored::new("9", 2.0), Scored::new("5", 1.0)],
    )?;
    assert_eq!(master.recommend("10", "", 3)?, ["9", "5", "8"]);
    Ok(())
}

#[test]
fn item_based_uses_neighbors_of_liked_items() -> anyhow::Result<()> {
    let master = prepared(&[])?;
    assert_eq!(master.recommend_with("10", "", 3, &["item_based"])?, ["9", "8", "7"]);
    Ok(())
}

#[test]
fn category_filters_every_step() -> anyhow::Result<()> {
    let master = prepared(&[])?;
    let recommended = master.recommend_with("10", "*", 3, &["item_based", "popular"])?;
    assert_eq!(recommended, ["8", "6", "4"]);
    Ok(())
}

#[test]
fn short_results_are_not_an_error() -> anyhow::Result<()> {
    let master = prepared(&["latest"])?;
    // the scenario items carry no timestamps
    assert!(master.recommend("10", "", 3)?.is_empty());
    // a user who has seen everything
    assert!(master.recommend_with("0", "", 3, &["popular"])?.len() < 3);
    Ok(())
}

#[test]
fn unknown_recommender_is_a_configuration_error() -> anyhow::Result<()> {
    let master = prepared(&[])?;
    let err = master.recommend_with("10", "", 3, &["magic"]).unwrap_err();
    assert!(matches!(err, RecError::Configuration(_)));

    let mut config = scenario_config();
    config.recommend.fallback_recommend = vec!["magic".to_string()];
    assert!(matches!(
        master_with(&neighbor_items(), config),
        Err(RecError::Configuration(_))
    ));
    Ok(())
}
