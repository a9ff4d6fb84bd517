use msqueue_rs::ConcurrentQueue;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    tracing_subscriber::fmt()
        .with_thread_names(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("ConcurrentQueue Rust Example");
    println!("----------------------------\n");

    // Single-threaded FIFO
    let queue = ConcurrentQueue::new();
    queue.enqueue(1);
    queue.enqueue(2);
    queue.enqueue(3);
    for _ in 0..4 {
        match queue.dequeue() {
            Some(value) => println!("Dequeued: {value}"),
            None => println!("queue is empty"),
        }
    }
    println!();

    // Configuration
    const PRODUCERS: usize = 2; // Number of producer threads
    const CONSUMERS: usize = 2; // Number of consumer threads
    const N: u32 = 1_000_000; // Each producer pushes this many elements into the queue

    // Create a queue object shared between all producers and consumers
    let queue = Arc::new(ConcurrentQueue::<u32>::new());

    println!("Starting {PRODUCERS} producers and {CONSUMERS} consumers");
    println!("Each producer will push {N} elements\n");

    let start_time = Instant::now();

    // Start the consumers
    let mut consumer_threads = Vec::with_capacity(CONSUMERS);
    for _ in 0..CONSUMERS {
        let q = queue.clone();
        consumer_threads.push(thread::spawn(move || {
            let mut local_sum = 0u64;

            // Keep popping elements until we get a 0 (termination signal)
            loop {
                match q.dequeue() {
                    Some(0) => break,
                    Some(n) => local_sum += n as u64,
                    None => thread::yield_now(),
                }
            }

            local_sum
        }));
    }

    // Start the producers
    let mut producer_threads = Vec::with_capacity(PRODUCERS);
    for _ in 0..PRODUCERS {
        let q = queue.clone();
        producer_threads.push(thread::spawn(move || {
            // Push elements in descending order [N, 1]
            for n in (1..=N).rev() {
                q.enqueue(n);
            }
        }));
    }

    for handle in producer_threads {
        handle.join().unwrap();
    }

    // Tell consumers to terminate by pushing one 0 for each consumer
    for _ in 0..CONSUMERS {
        queue.enqueue(0);
    }

    let sums: Vec<u64> = consumer_threads
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    let total_sum: u64 = sums.iter().sum();

    // The expected sum is N*(N+1)/2 * PRODUCERS
    let expected_sum: u64 = (N as u64 * (N as u64 + 1) / 2) * PRODUCERS as u64;

    println!("Execution time: {:?}", start_time.elapsed());
    println!("Total sum: {total_sum}");
    println!("Expected sum: {expected_sum}");

    if total_sum != expected_sum {
        println!("ERROR: Sum mismatch! Difference: {}", total_sum as i64 - expected_sum as i64);
    } else {
        println!("SUCCESS: All elements were correctly processed.");
    }

    println!("\nPer-consumer statistics:");
    for (i, &sum) in sums.iter().enumerate() {
        println!("Consumer {i}: sum = {sum}");
        if sum == 0 {
            println!("WARNING: Consumer {i} received no elements!");
        }
    }
}
