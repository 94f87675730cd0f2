fn main() {
    bot_commons::start_everything("warn,sticky_note_bot=debug", sticky_note_bot::entry());
}
