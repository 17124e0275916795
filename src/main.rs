fn main() {
    devscope_lib::run()
}
