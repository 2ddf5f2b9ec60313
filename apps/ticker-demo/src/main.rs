use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use doodle_core::{Clock, Scheduler, StrandJob, Time, Timer};
use doodle_runtime_std::StdRuntime;

fn main() {
    #[cfg(feature = "logging")]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    println!("=== doodle ticker ===");
    println!("Runs a repeating ticker, a strand of slow jobs, a frame loop and");
    println!("posts from a worker thread for about two seconds, then shuts down.");
    println!();

    let runtime = StdRuntime::new();
    let scheduler = runtime.scheduler();
    let clock = runtime.clock();
    let timer = runtime.timer();

    let ticks = Rc::new(Cell::new(0u32));
    let ticker = {
        let ticks = ticks.clone();
        let clock = clock.clone();
        scheduler.every(
            Time::milliseconds(250.0),
            Box::new(move |elapsed| {
                ticks.set(ticks.get() + 1);
                println!(
                    "tick {:>2}  wall {:.0} ms  since last {}",
                    ticks.get(),
                    clock.epoch().as_millis(),
                    elapsed
                );
            }),
        )
    };

    let frames = Rc::new(Cell::new(0u32));
    let frame_loop = {
        let frames = frames.clone();
        let started = timer.now();
        let timer = timer.clone();
        runtime.frame_clock().frame_loop(move |_| {
            frames.set(frames.get() + 1);
            timer.now() - started < Time::milliseconds(500.0)
        })
    };

    let strand = runtime.strand();
    let strand_task = {
        let strand_started = timer.now();
        let timer = timer.clone();
        scheduler.after(
            Time::milliseconds(400.0),
            Box::new(move |_| {
                let jobs: Vec<StrandJob> = (1..=5)
                    .map(|index| {
                        let timer = timer.clone();
                        Box::new(move || {
                            thread::sleep(Duration::from_millis(8));
                            println!(
                                "strand job {} at {}",
                                index,
                                timer.now() - strand_started
                            );
                        }) as StrandJob
                    })
                    .collect();
                strand.invoke(jobs);
            }),
        )
    };

    let dispatcher = runtime.runtime_handle().dispatcher();
    let queue = runtime.runtime_handle().debounce_queue();
    let worker = thread::spawn(move || {
        for index in 0..3 {
            thread::sleep(Duration::from_millis(300));
            dispatcher.post(move || println!("worker message {}", index));
        }
    });
    for index in 0..3 {
        queue.post(move || println!("queued event {}", index));
    }

    let waited = runtime.block_on(scheduler.delay(Time::milliseconds(2_000.0)));
    if let Err(err) = waited {
        log::error!("main delay failed: {}", err);
    }
    if worker.join().is_err() {
        log::error!("worker thread panicked");
    }
    ticker.cancel();
    runtime.run_until_idle();

    println!();
    println!(
        "ticks: {}  frames: {}  frame loop done: {}  strand scheduled: {}",
        ticks.get(),
        frames.get(),
        frame_loop.completed(),
        strand_task.completed()
    );

    runtime.shutdown();
    let late = scheduler.after(Time::ZERO, Box::new(|_| {}));
    println!("after shutdown new work is {:?}", late.state());
}
