//! 一个小的演示负载：两个任务共享一个热点页的访问模式，其中一个任务中途被杀死

#[macro_use]
extern crate log;

use executor::{yield_now, Executor};
use vmsim::{
    memory::{MemoryConfig, ReferenceKind, VirtAddr, VirtPageNum},
    sim::{SimConfig, Simulation},
    KResult,
};

fn main() -> KResult {
    simple_logger::init();

    let config = SimConfig {
        memory: MemoryConfig {
            frame_count: 4,
            ..MemoryConfig::default()
        },
        ..SimConfig::default()
    };
    let sim = Simulation::new(config)?;
    let layout = sim.memory().layout();
    let addr = move |vpn: usize, offset: usize| layout.join(VirtPageNum(vpn), offset);

    let (writer_task, _) = sim.create_task();
    let (reader_task, _) = sim.create_task();

    let (_, writer) = sim.spawn_thread(&writer_task, move |mm, thread| async move {
        for round in 0u8..6 {
            for vpn in [0, round as usize % 5 + 1, 0] {
                mm.store(&thread, addr(vpn, 16), &[round; 32]).await?;
            }
        }
        let mut buf = [0; 32];
        mm.load(&thread, addr(0, 16), &mut buf).await?;
        info!("writer reads back {:?}..", &buf[..4]);
        KResult::Ok(())
    });

    let (_, reader) = sim.spawn_thread(&reader_task, move |mm, thread| async move {
        for _ in 0..50 {
            for vpn in 0..6 {
                mm.translate(&thread, addr(vpn, 0), ReferenceKind::Read)
                    .await?;
                yield_now().await;
            }
        }
        KResult::Ok(())
    });
    let (_, _locker) = sim.spawn_thread(&reader_task, move |mm, thread| async move {
        let page = mm.translate(&thread, VirtAddr(0), ReferenceKind::Read).await?;
        let frame = mm.lock(&thread, &page).await?;
        info!("locker pins {page} on {frame}");
        for _ in 0..20 {
            yield_now().await;
        }
        mm.unlock(frame)
    });

    // 先跑一段时间，再杀死只读任务
    for _ in 0..200 {
        if !sim.executor().run_once() {
            break;
        }
    }
    sim.kill_task(&reader_task);
    sim.run();

    match Executor::try_join(writer) {
        Ok(result) => info!("writer finished: {result:?}"),
        Err(_) => warn!("writer did not finish"),
    }
    match Executor::try_join(reader) {
        Ok(result) => info!("reader finished: {result:?}"),
        Err(_) => warn!("reader did not finish"),
    }
    info!("final statistics: {}", sim.memory().stats());
    sim.memory().check_invariants(&sim.tasks())
}
