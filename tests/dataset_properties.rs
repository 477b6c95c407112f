use recmaster_rs::dataset::MatchingSet;
use recmaster_rs::test_support::random_fixture;
use recmaster_rs::DatasetBuilder;
use std::collections::HashSet;

fn pairs(set: &MatchingSet) -> HashSet<(u32, u32)> {
    set.user_indices
        .iter()
        .copied()
        .zip(set.item_indices.iter().copied())
        .collect()
}

fn builder() -> DatasetBuilder {
    DatasetBuilder::new(vec!["like".to_string()], Vec::new())
}

#[test]
fn train_and_test_partition_positive_pairs() -> anyhow::Result<()> {
    let fixture = random_fixture(5, 80, 150, 12);
    let dataset = builder()
        .test_ratio(0.2)
        .split_seed(9)
        .build(&fixture.users, &fixture.items, &fixture.feedback)?;

    let train = pairs(&dataset.matching_train);
    let test = pairs(&dataset.matching_test);
    assert!(train.is_disjoint(&test));
    assert_eq!(train.len(), dataset.matching_train.count());
    assert_eq!(test.len(), dataset.matching_test.count());
    assert_eq!(train.len() + test.len(), dataset.stats.num_valid_pos_feedbacks);
    assert!(!test.is_empty());
    Ok(())
}

#[test]
fn split_is_stable_for_a_seed() -> anyhow::Result<()> {
    let fixture = random_fixture(5, 50, 80, 6);
    let build = |seed| {
        builder()
            .test_ratio(0.3)
            .split_seed(seed)
            .build(&fixture.users, &fixture.items, &fixture.feedback)
    };
    let first = build(1)?;
    let again = build(1)?;
    assert_eq!(pairs(&first.matching_test), pairs(&again.matching_test));
    Ok(())
}

#[test]
fn rankings_are_monotonic_in_every_scope() -> anyhow::Result<()> {
    let fixture = random_fixture(21, 60, 100, 9);
    let dataset = builder().build(&fixture.users, &fixture.items, &fixture.feedback)?;

    for ranking in [&dataset.popular_items, &dataset.latest_items] {
        for scope in ranking.scopes() {
            let list = ranking.get(scope);
            for pair in list.windows(2) {
                assert!(pair[0].score >= pair[1].score, "scope {scope:?} is not sorted");
            }
            for entry in list {
                let index = dataset.items.index(&entry.id).expect("ranked item is indexed");
                assert!(!dataset.items.is_hidden(index));
            }
        }
    }
    Ok(())
}
