use std::hint::black_box;
use std::time::Instant;

use strata_gfx::{
    Buffer, BufferUsage, CommandStream, GpuDevice, HeadlessDevice, QueueKind, Submission,
    UploadQueue,
};

fn make_buffers(device: &mut HeadlessDevice, count: usize, size: u64) -> Vec<Buffer> {
    (0..count)
        .map(|i| {
            Buffer::create(device, size, BufferUsage::Storage, format!("bench-{i}"))
                .expect("headless allocation")
        })
        .collect()
}

fn bench_stage_and_flush(count: usize, size: u64, iterations: usize) {
    let mut device = HeadlessDevice::new();
    let mut buffers = make_buffers(&mut device, count, size);
    let payload = vec![0xABu8; size as usize];
    let mut stream = CommandStream::new(QueueKind::Transfer, "bench-copy");

    let start = Instant::now();
    for _ in 0..iterations {
        stream.reset();
        for buffer in &mut buffers {
            buffer.buffer_data(0, black_box(&payload));
        }
        let mut queue = UploadQueue::new();
        for buffer in &mut buffers {
            queue.add_buffer_request(buffer);
        }
        black_box(queue.flush_all(&mut stream));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  stage+flush ({count} buffers x {size} bytes, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_submit(count: usize, size: u64, iterations: usize) {
    let mut device = HeadlessDevice::new();
    let mut buffers = make_buffers(&mut device, count, size);
    let payload = vec![0x5Au8; size as usize];
    let mut stream = CommandStream::new(QueueKind::Transfer, "bench-copy");

    let start = Instant::now();
    for _ in 0..iterations {
        stream.reset();
        for buffer in &mut buffers {
            buffer.buffer_data(0, &payload);
            buffer.copy(&mut stream);
        }
        stream.close();
        device
            .submit(&Submission {
                queue: QueueKind::Transfer,
                streams: &[&stream],
                waits: &[],
                signals: &[],
            })
            .expect("headless submit");
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  submit ({count} buffers x {size} bytes, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn main() {
    println!("=== Upload Benchmarks ===\n");

    println!("Stage + flush:");
    bench_stage_and_flush(8, 256, 10000);
    bench_stage_and_flush(64, 4096, 1000);
    bench_stage_and_flush(16, 1 << 20, 20);

    println!("\nHeadless submit:");
    bench_submit(8, 256, 10000);
    bench_submit(64, 4096, 100);

    println!("\n=== Done ===");
}
