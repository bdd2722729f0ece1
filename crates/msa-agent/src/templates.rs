//! Wire-level text templates for the two synthetic `user` messages the
//! Agent Loop appends: the initial task prompt and the per-command
//! Observation fed back after execution.

pub fn user_task_message(task: &str) -> String {
    format!("任务: {task}\n\n请理解任务并开始执行。")
}

#[allow(clippy::too_many_arguments)]
pub fn observation_message(command: &str, success: bool, stdout: &str, stderr: &str) -> String {
    let error_line = if success { "" } else { stderr };
    format!(
        "上一个命令的执行结果：\n\n命令: {command}\n成功: {success}\n输出: {stdout}\n错误: {error_line}\n\n请根据这个结果，决定下一步行动。"
    )
}

pub fn invalid_command_message(reason: &str) -> String {
    format!("命令不合法: {reason}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_template_matches_wire_shape() {
        let msg = user_task_message("print hi");
        assert!(msg.starts_with("任务: print hi"));
        assert!(msg.contains("请理解任务并开始执行"));
    }

    #[test]
    fn observation_hides_stderr_on_success() {
        let msg = observation_message("echo hi", true, "hi", "");
        assert!(msg.contains("命令: echo hi"));
        assert!(msg.contains("成功: true"));
        assert!(msg.contains("输出: hi"));
        assert!(msg.ends_with("请根据这个结果，决定下一步行动。"));
    }

    #[test]
    fn observation_surfaces_stderr_on_failure() {
        let msg = observation_message("false", false, "", "exit 1");
        assert!(msg.contains("成功: false"));
        assert!(msg.contains("错误: exit 1"));
    }
}
