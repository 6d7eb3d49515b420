fn main() {
    grid_dbscan::cli::run();
}
