//! Block lifecycle feeding the bloom indexer, and historical queries over
//! the produced index.

use alloy::primitives::{Address, B256, U256};
use bevm::{
    bloom::{BloomIndexer, IndexerConfig},
    engine::TRANSFER_TOPIC,
    test_utils::{addr_of, dev_key, funded_keeper, sign_evm_tx},
    MemBloomStore, Tx, TxData,
};
use std::{sync::Arc, time::Duration};

fn block_hash(height: u64) -> B256 {
    B256::repeat_byte(height as u8 + 1)
}

fn indexer_config() -> IndexerConfig {
    IndexerConfig {
        section_size: 8,
        service_threads: 2,
        filter_threads: 2,
        retrieval_batch: 4,
        retrieval_wait: Duration::from_millis(1),
        throttling: Duration::ZERO,
    }
}

async fn wait_until_indexed(keeper: &bevm::Keeper, sections: u64) {
    let indexer = keeper.indexer().expect("indexer attached");
    for _ in 0..200 {
        if indexer.valid_sections() >= sections && !indexer.is_processing() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("section was not indexed in time");
}

#[tokio::test]
async fn sections_index_at_boundaries_and_answer_filters() {
    let transfer_heights = [3u64, 6];
    let mut keeper = funded_keeper(&[
        (addr_of(&dev_key(3)), U256::from(100_000u64)),
        (addr_of(&dev_key(6)), U256::from(100_000u64)),
    ])
    .with_indexer(BloomIndexer::new(
        Arc::new(MemBloomStore::new()),
        indexer_config(),
        tokio::runtime::Handle::current(),
    ));

    // drive 9 blocks; the hash of block 8 lands in the store during block
    // 9's begin, so the first section indexes at block 9's end
    for height in 1..=9u64 {
        keeper.begin_block(height, block_hash(height), block_hash(height - 1));
        if transfer_heights.contains(&height) {
            let key = dev_key(height as u8);
            let tx = Tx::Evm(sign_evm_tx(
                TxData {
                    nonce: 0,
                    gas_price: U256::from(1u64),
                    gas_limit: 21_000,
                    to: Some(Address::repeat_byte(0x99)),
                    value: U256::from(10u64),
                    payload: Default::default(),
                    v: 0,
                    r: U256::ZERO,
                    s: U256::ZERO,
                },
                1,
                &key,
            ));
            let response = keeper.deliver_tx(&tx).unwrap();
            assert!(response.vm_error.is_none());
        }
        keeper.end_block(height);
    }

    wait_until_indexed(&keeper, 1).await;
    let indexer = keeper.indexer().unwrap();
    assert_eq!(indexer.valid_sections(), 1);

    // the transfer topic marks exactly the heights that carried transfers
    let heights =
        indexer.filter_heights(None, &[vec![TRANSFER_TOPIC]], 1, 8).await.unwrap();
    assert_eq!(heights, vec![3, 6]);

    // filtering by the recipient address narrows the same way
    let mut recipient_topic = B256::ZERO;
    recipient_topic[12..].copy_from_slice(Address::repeat_byte(0x99).as_slice());
    let heights = indexer
        .filter_heights(None, &[vec![TRANSFER_TOPIC], vec![recipient_topic]], 1, 8)
        .await
        .unwrap();
    assert_eq!(heights, vec![3, 6]);

    // an address that appeared in no log matches nothing
    let heights = indexer
        .filter_heights(Some(Address::repeat_byte(0x42)), &[], 1, 8)
        .await
        .unwrap();
    assert!(heights.is_empty());

    keeper.indexer().unwrap().close();
}

#[tokio::test]
async fn persisted_block_blooms_match_delivered_transactions() {
    let key = dev_key(3);
    let mut keeper = funded_keeper(&[(addr_of(&key), U256::from(100_000u64))]);

    keeper.begin_block(1, block_hash(1), block_hash(0));
    let tx = Tx::Evm(sign_evm_tx(
        TxData {
            nonce: 0,
            gas_price: U256::from(1u64),
            gas_limit: 21_000,
            to: Some(Address::repeat_byte(0x77)),
            value: U256::from(1u64),
            payload: Default::default(),
            v: 0,
            r: U256::ZERO,
            s: U256::ZERO,
        },
        1,
        &key,
    ));
    let bloom = keeper.deliver_tx(&tx).unwrap().result.unwrap().bloom;
    keeper.end_block(1);

    assert_eq!(keeper.block_bloom(1).unwrap(), bloom);
    // a block without transactions persists an empty bloom
    keeper.begin_block(2, block_hash(2), block_hash(1));
    keeper.end_block(2);
    assert!(keeper.block_bloom(2).unwrap().is_zero());
}
